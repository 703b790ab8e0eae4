//! Discovery of rule databases under the XDG data directories.

use std::ffi::OsString;
use std::path::PathBuf;

/// Which database file to look for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseKind {
    Globs,
    Magic,
}

impl DatabaseKind {
    fn relative_path(self) -> &'static str {
        match self {
            DatabaseKind::Globs => "mime/globs2",
            DatabaseKind::Magic => "mime/magic",
        }
    }
}

/// Data directories in precedence order: the user data directory
/// (`$XDG_DATA_HOME`, default `~/.local/share`) first, then each entry of
/// `$XDG_DATA_DIRS`.
pub fn xdg_data_dirs() -> Vec<PathBuf> {
    data_dirs_from(dirs::data_dir(), std::env::var_os("XDG_DATA_DIRS"))
}

fn data_dirs_from(data_home: Option<PathBuf>, data_dirs: Option<OsString>) -> Vec<PathBuf> {
    let mut found: Vec<PathBuf> = data_home.into_iter().collect();

    match data_dirs.filter(|v| !v.is_empty()) {
        Some(list) => found.extend(
            std::env::split_paths(&list).filter(|p| !p.as_os_str().is_empty()),
        ),
        None => found.extend(["/usr/local/share", "/usr/share"].map(PathBuf::from)),
    }

    found
}

/// Existing database files of `kind`, highest precedence first.
pub fn xdg_database_files(kind: DatabaseKind) -> Vec<PathBuf> {
    database_files_in(&xdg_data_dirs(), kind)
}

fn database_files_in(dirs: &[PathBuf], kind: DatabaseKind) -> Vec<PathBuf> {
    dirs.iter()
        .map(|dir| dir.join(kind.relative_path()))
        .filter(|path| path.is_file())
        .collect()
}
