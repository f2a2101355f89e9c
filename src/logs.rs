//! Reading the daily log files written by the workers.

use std::io::ErrorKind as IoErrorKind;
use std::path::Path;

use crate::error::{AppError, Result};
use crate::paths::get_log_file_path;
use crate::validation::{validate_instance_id, validate_log_date};

/// Contents of `<work_dir>/logs/<date>/<instance_id>.log`.
///
/// Both path segments are validated, so nothing outside the logs tree can
/// be read.
pub async fn read_log(work_dir: &Path, date: &str, instance_id: &str) -> Result<String> {
    validate_log_date(date)?;
    validate_instance_id(instance_id)?;

    let path = get_log_file_path(work_dir, date, instance_id);
    match tokio::fs::read(&path).await {
        Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) if e.kind() == IoErrorKind::NotFound => {
            Err(AppError::log_not_found(date, instance_id))
        }
        Err(e) => Err(AppError::io(format!(
            "Failed to read {}: {}",
            path.display(),
            e
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn reads_existing_log() {
        let dir = tempfile::tempdir().unwrap();
        let day = dir.path().join("logs").join("2024-03-01");
        std::fs::create_dir_all(&day).unwrap();
        std::fs::write(day.join("qtap_1.log"), "cycle 1 ok\n").unwrap();

        let text = read_log(dir.path(), "2024-03-01", "qtap_1").await.unwrap();
        assert_eq!(text, "cycle 1 ok\n");
    }

    #[tokio::test]
    async fn missing_log_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_log(dir.path(), "2024-03-01", "qtap_1")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LogNotFound);
    }

    #[tokio::test]
    async fn traversal_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        for (date, id) in [
            ("..", "qtap_1"),
            ("2024-03-01", "../../secret"),
            ("2024-13-01", "qtap_1"),
            ("2024-03-01", "qtap_1/../qtap_2"),
        ] {
            let err = read_log(dir.path(), date, id).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation, "{} {}", date, id);
        }
    }
}
