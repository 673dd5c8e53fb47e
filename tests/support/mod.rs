use std::path::Path;

pub use lodestone::init_tracing;

/// Reads the single session directory created under the test's log root.
pub fn session_dir(log_root: &Path) -> std::path::PathBuf {
    let mut entries: Vec<_> = std::fs::read_dir(log_root)
        .expect("log root should exist")
        .map(|entry| entry.expect("readable dir entry").path())
        .collect();
    assert_eq!(entries.len(), 1, "one session, one timestamped directory");
    entries.remove(0)
}

/// Finds the log file for the named root-level target and returns its
/// contents.
pub fn read_target_log(session_dir: &Path, target: &str) -> String {
    let prefix = format!("{target}.");
    let path = std::fs::read_dir(session_dir)
        .expect("session dir should exist")
        .map(|entry| entry.expect("readable dir entry").path())
        .find(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(&prefix) && name.ends_with(".log"))
        })
        .unwrap_or_else(|| panic!("no log file for target {target}"));
    std::fs::read_to_string(path).expect("log file should be readable")
}

pub fn log_file_count(session_dir: &Path) -> usize {
    std::fs::read_dir(session_dir)
        .expect("session dir should exist")
        .count()
}
