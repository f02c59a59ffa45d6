use std::fs;
use std::path::{Path, PathBuf};

use crate::profile::domain::biometric_profile::{AssembledProfile, BiometricProfile};
use crate::profile::domain::profile_store::{ExistingProfilePolicy, ProfileStore, StoreError};
use crate::shared::constants::{PROFILE_FILE_NAME, REFERENCE_IMAGE_NAME};
use crate::shared::frame::Frame;

/// File-backed profile store: one directory per user under `root`, holding
/// `profile.json`, one JPEG per angle and `reference.jpg`.
///
/// A record is written into a staging directory first and renamed into
/// place, so readers never observe a half-written profile.
pub struct JsonProfileStore {
    root: PathBuf,
    jpeg_quality: u8,
    policy: ExistingProfilePolicy,
}

impl JsonProfileStore {
    pub fn new(root: PathBuf, jpeg_quality: u8, policy: ExistingProfilePolicy) -> Self {
        Self {
            root,
            jpeg_quality,
            policy,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn profile_dir(&self, user_id: &str) -> PathBuf {
        self.root.join(user_id)
    }

    fn write_staged(&self, staging: &Path, profile: &AssembledProfile) -> Result<(), StoreError> {
        fs::create_dir_all(staging)?;
        for (file_name, image) in &profile.images {
            self.write_jpeg(&staging.join(file_name), image)?;
        }
        self.write_jpeg(&staging.join(REFERENCE_IMAGE_NAME), &profile.reference)?;
        let json = serde_json::to_string_pretty(&profile.profile)?;
        fs::write(staging.join(PROFILE_FILE_NAME), json)?;
        Ok(())
    }

    fn write_jpeg(&self, path: &Path, frame: &Frame) -> Result<(), StoreError> {
        let bytes = frame
            .encode_jpeg(self.jpeg_quality)
            .map_err(|e| format!("Failed to encode {}: {e}", path.display()))?;
        fs::write(path, bytes)?;
        Ok(())
    }

    /// Moves `staging` to `target`, dealing with an existing record per policy.
    fn swap_in(&self, staging: &Path, target: &Path, user_id: &str) -> Result<(), StoreError> {
        if !target.exists() {
            fs::rename(staging, target)?;
            return Ok(());
        }

        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S%.3f");
        match self.policy {
            ExistingProfilePolicy::Backup => {
                let backup = self.root.join(format!("{user_id}.bak-{stamp}"));
                fs::rename(target, &backup)?;
                log::info!("Backed up previous profile to {}", backup.display());
                fs::rename(staging, target)?;
            }
            ExistingProfilePolicy::Overwrite => {
                let retired = self.root.join(format!(".{user_id}.old-{stamp}"));
                fs::rename(target, &retired)?;
                if let Err(e) = fs::rename(staging, target) {
                    return Err(restore_retired(&retired, target, e));
                }
                if let Err(e) = fs::remove_dir_all(&retired) {
                    log::warn!("Could not remove replaced profile {}: {e}", retired.display());
                }
                log::info!("Overwrote existing profile for '{user_id}'");
            }
        }
        Ok(())
    }
}

/// Moves a retired record back to `target` after a failed swap. The returned
/// error carries `cause`, plus the retired location when the record could not
/// be put back.
fn restore_retired(retired: &Path, target: &Path, cause: std::io::Error) -> StoreError {
    match fs::rename(retired, target) {
        Ok(()) => cause.into(),
        Err(e) => {
            log::error!(
                "Could not restore previous profile from {} to {}: {e}",
                retired.display(),
                target.display()
            );
            format!(
                "{cause}; previous profile left at {} (restore to {} failed: {e})",
                retired.display(),
                target.display()
            )
            .into()
        }
    }
}

impl ProfileStore for JsonProfileStore {
    fn save(&self, profile: &AssembledProfile) -> Result<PathBuf, StoreError> {
        let user_id = profile.user_id();
        fs::create_dir_all(&self.root)?;

        let target = self.profile_dir(user_id);
        let staging = self.root.join(format!(
            ".{user_id}.staging-{}",
            std::process::id()
        ));
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }

        let result = self
            .write_staged(&staging, profile)
            .and_then(|()| self.swap_in(&staging, &target, user_id));
        if result.is_err() && staging.exists() {
            if let Err(e) = fs::remove_dir_all(&staging) {
                log::warn!("Could not remove staging directory {}: {e}", staging.display());
            }
        }
        result?;

        log::info!("Saved profile for '{user_id}' to {}", target.display());
        Ok(target)
    }

    fn exists(&self, user_id: &str) -> bool {
        self.profile_dir(user_id).join(PROFILE_FILE_NAME).is_file()
    }

    fn load(&self, user_id: &str) -> Result<Option<BiometricProfile>, StoreError> {
        let path = self.profile_dir(user_id).join(PROFILE_FILE_NAME);
        if !path.is_file() {
            return Ok(None);
        }
        let json = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&json)?))
    }
}
