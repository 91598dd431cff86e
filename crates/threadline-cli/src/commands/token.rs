use anyhow::{bail, Result};
use threadline_core::{CaptureSource, Credential, ThreadlinePaths};

use crate::ui;

pub fn set(paths: &ThreadlinePaths, value: &str) -> Result<()> {
    if Credential::parse(value).is_none() {
        bail!("Expected an Authorization value of the form \"Bearer <token>\"");
    }

    let provider = super::credentials(paths)?;
    match provider.observe_authorization(value, CaptureSource::Manual) {
        Some(credential) => ui::success(&format!("Stored {}", credential.masked())),
        None => ui::info("Credential unchanged."),
    }
    Ok(())
}

pub fn show(paths: &ThreadlinePaths) -> Result<()> {
    let provider = super::credentials(paths)?;
    match provider.current() {
        Some(credential) => ui::info(&credential.masked()),
        None => {
            ui::info("No credential stored.");
            ui::dim("Store one with: threadline token set \"Bearer <token>\"");
        }
    }
    Ok(())
}

pub fn clear(paths: &ThreadlinePaths) -> Result<()> {
    let provider = super::credentials(paths)?;
    if provider.clear()? {
        ui::success("Credential removed.");
    } else {
        ui::info("No credential stored.");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(paths: &ThreadlinePaths) -> Option<String> {
        super::super::credentials(paths)
            .unwrap()
            .current()
            .map(|credential| credential.as_str().to_string())
    }

    #[test]
    fn test_set_show_clear() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ThreadlinePaths::from_base(dir.path().join("data"));

        set(&paths, "Bearer abc123").unwrap();
        assert!(paths.storage_path.is_file());
        assert_eq!(stored(&paths).as_deref(), Some("Bearer abc123"));
        show(&paths).unwrap();

        clear(&paths).unwrap();
        assert_eq!(stored(&paths), None);
        clear(&paths).unwrap();
    }

    #[test]
    fn test_set_rejects_non_bearer_value() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ThreadlinePaths::from_base(dir.path().to_path_buf());

        assert!(set(&paths, "Basic Zm9vOmJhcg==").is_err());
        assert!(!paths.storage_path.exists());
    }
}
