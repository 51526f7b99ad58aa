pub mod job_pool;
pub mod multierr;
