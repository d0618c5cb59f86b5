//! Loading migration files from a directory.
//!
//! # Ordering
//!
//! Files run in lexicographic order of their names, compared byte-wise
//! (`"10_c.sql" < "1_a.sql" < "2_b.sql"`). The order in which the filesystem
//! enumerates entries is never used. Zero-pad numeric prefixes
//! (`0001_create_users.sql`) so that lexicographic and numeric order agree.
//!
//! Subdirectories and hidden entries (names starting with `.`) are ignored.

use std::fs;
use std::path::Path;

use crate::error::Error;
use crate::MigrationFile;

/// List every migration file in `dir`, with its content, in execution order.
///
/// The whole set is read before returning: if any entry cannot be read as
/// UTF-8 text, no migration is returned and the run must not start.
pub fn list_migrations(dir: impl AsRef<Path>) -> Result<Vec<MigrationFile>, Error> {
    let dir = dir.as_ref();
    let io_error = |path: &Path| {
        let path = path.to_path_buf();
        move |source: std::io::Error| Error::Io { path, source }
    };

    let mut migrations = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_error(dir))? {
        let entry = entry.map_err(io_error(dir))?;
        let path = entry.path();

        let name = entry.file_name().into_string().map_err(|raw| Error::Io {
            path: path.clone(),
            source: std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("file name {:?} is not valid UTF-8", raw),
            ),
        })?;

        if name.starts_with('.') {
            #[cfg(feature = "tracing")]
            tracing::debug!(entry = %name, "Ignoring hidden entry");
            continue;
        }

        // Follows symlinks, so a linked migration file is picked up
        if fs::metadata(&path).map_err(io_error(&path))?.is_dir() {
            #[cfg(feature = "tracing")]
            tracing::debug!(entry = %name, "Ignoring subdirectory");
            continue;
        }

        let content = fs::read_to_string(&path).map_err(io_error(&path))?;
        migrations.push(MigrationFile {
            name,
            path,
            content,
        });
    }

    migrations.sort_by(|a, b| a.name.cmp(&b.name));

    #[cfg(feature = "tracing")]
    tracing::debug!(
        dir = %dir.display(),
        migrations = ?migrations.iter().map(|m| m.name.as_str()).collect::<Vec<_>>(),
        "Loaded migration files"
    );

    Ok(migrations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::ErrorKind;

    fn names(migrations: &[MigrationFile]) -> Vec<&str> {
        migrations.iter().map(|m| m.name.as_str()).collect()
    }

    #[test]
    fn sorts_lexicographically_regardless_of_creation_order() {
        let dir = tempfile::tempdir().unwrap();
        // Created in reverse so that creation-order enumeration would be wrong
        for name in ["c.sql", "b.sql", "a.sql", "10_x.sql", "2_y.sql", "1_z.sql"] {
            fs::write(dir.path().join(name), format!("-- {}", name)).unwrap();
        }

        let migrations = list_migrations(dir.path()).unwrap();
        assert_eq!(
            names(&migrations),
            vec!["10_x.sql", "1_z.sql", "2_y.sql", "a.sql", "b.sql", "c.sql"]
        );
    }

    #[test]
    fn loads_full_content() {
        let dir = tempfile::tempdir().unwrap();
        let sql = "CREATE TABLE users (id SERIAL PRIMARY KEY);\nINSERT INTO users DEFAULT VALUES;\n";
        fs::write(dir.path().join("001_users.sql"), sql).unwrap();

        let migrations = list_migrations(dir.path()).unwrap();
        assert_eq!(migrations.len(), 1);
        assert_eq!(migrations[0].name, "001_users.sql");
        assert_eq!(migrations[0].content, sql);
        assert_eq!(migrations[0].path, dir.path().join("001_users.sql"));
    }

    #[test]
    fn ignores_subdirectories_and_hidden_entries() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("001_users.sql"), "SELECT 1").unwrap();
        fs::write(dir.path().join(".gitkeep"), "").unwrap();
        fs::create_dir(dir.path().join("archive")).unwrap();
        fs::write(dir.path().join("archive").join("000_old.sql"), "SELECT 1").unwrap();

        let migrations = list_migrations(dir.path()).unwrap();
        assert_eq!(names(&migrations), vec!["001_users.sql"]);
    }

    #[cfg(feature = "tracing")]
    #[test]
    fn logs_each_ignored_entry() {
        use std::sync::{Arc, Mutex};

        struct CaptureWriter(Arc<Mutex<Vec<u8>>>);
        impl std::io::Write for CaptureWriter {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("001_users.sql"), "SELECT 1").unwrap();
        fs::write(dir.path().join(".gitkeep"), "").unwrap();
        fs::create_dir(dir.path().join("archive")).unwrap();

        let captured = Arc::new(Mutex::new(Vec::<u8>::new()));
        let captured_clone = Arc::clone(&captured);
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .without_time()
            .with_target(false)
            .with_ansi(false)
            .with_writer(move || CaptureWriter(Arc::clone(&captured_clone)))
            .finish();

        let migrations = tracing::subscriber::with_default(subscriber, || {
            list_migrations(dir.path()).unwrap()
        });

        assert_eq!(names(&migrations), vec!["001_users.sql"]);
        let output = String::from_utf8(captured.lock().unwrap().clone()).unwrap();
        assert!(output.contains("Ignoring hidden entry entry=.gitkeep"), "{}", output);
        assert!(output.contains("Ignoring subdirectory entry=archive"), "{}", output);
    }

    #[test]
    fn empty_directory_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(list_migrations(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn missing_directory_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");

        match list_migrations(&missing) {
            Err(Error::Io { path, source }) => {
                assert_eq!(path, missing);
                assert_eq!(source.kind(), ErrorKind::NotFound);
            }
            other => panic!("expected an Io error, got {:?}", other),
        }
    }

    #[test]
    fn non_utf8_content_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("001_ok.sql"), "SELECT 1").unwrap();
        fs::write(dir.path().join("002_binary.sql"), [0xff, 0xfe, 0x00, 0x80]).unwrap();

        match list_migrations(dir.path()) {
            Err(Error::Io { path, source }) => {
                assert_eq!(path, dir.path().join("002_binary.sql"));
                assert_eq!(source.kind(), ErrorKind::InvalidData);
            }
            other => panic!("expected an Io error, got {:?}", other),
        }
    }
}
