use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A local file and the flat name it is uploaded under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    pub name: String,
}

/// Flattens a relative path into a single upload name: `dir/sub/file` becomes `dir_sub_file`.
fn flat_name(relative: &Path) -> String {
    relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("_")
}

/// Expands files and directories into the files to upload, in a stable order.
pub fn collect(paths: &[PathBuf]) -> io::Result<Vec<SourceFile>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            for entry in WalkDir::new(path).sort_by_file_name() {
                let entry = entry?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let relative = entry.path().strip_prefix(path).unwrap_or(entry.path());
                files.push(SourceFile {
                    path: entry.path().to_path_buf(),
                    name: flat_name(relative),
                });
            }
        } else if path.is_file() {
            let name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .ok_or_else(|| {
                    io::Error::new(io::ErrorKind::InvalidInput, "Path has no file name")
                })?;
            files.push(SourceFile {
                path: path.clone(),
                name,
            });
        } else {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} is not a file or directory", path.display()),
            ));
        }
    }
    Ok(files)
}
