use std::path::PathBuf;

use anyhow::{Result, bail};
use core_types::AppMode;
use notebook::LandingRequest;

/// The landing step: exactly one mode is selected at any time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LandingForm {
    mode: AppMode,
    user_identity: String,
    output_dir: Option<PathBuf>,
}

impl LandingForm {
    pub fn new(default_mode: AppMode) -> Self {
        Self {
            mode: default_mode,
            user_identity: String::new(),
            output_dir: None,
        }
    }

    /// Selecting a mode deselects the other one.
    pub fn select(&mut self, mode: AppMode) -> &mut Self {
        self.mode = mode;
        self
    }

    pub fn is_selected(&self, mode: AppMode) -> bool {
        self.mode == mode
    }

    pub fn user(&mut self, identity: &str) -> &mut Self {
        self.user_identity = identity.trim().to_string();
        self
    }

    /// `None` keeps the configured default.
    pub fn output_dir(&mut self, dir: Option<PathBuf>) -> &mut Self {
        self.output_dir = dir;
        self
    }

    pub fn submit(&self) -> Result<LandingRequest> {
        if self.user_identity.is_empty() {
            bail!("enter a user name, email or id");
        }
        Ok(LandingRequest {
            mode: self.mode,
            user_identity: self.user_identity.clone(),
            output_dir: self.output_dir.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modes_are_mutually_exclusive() {
        let mut form = LandingForm::new(AppMode::Researcher);
        assert!(form.is_selected(AppMode::Researcher));

        form.select(AppMode::Admin);
        assert!(form.is_selected(AppMode::Admin));
        assert!(!form.is_selected(AppMode::Researcher));

        form.select(AppMode::Researcher);
        assert!(!form.is_selected(AppMode::Admin));
    }

    #[test]
    fn submit_requires_a_user() {
        let mut form = LandingForm::new(AppMode::Admin);
        assert!(form.user("   ").submit().is_err());

        let request = form
            .user(" root@lab.test ")
            .output_dir(Some(PathBuf::from("/tmp/out")))
            .submit()
            .expect("request");
        assert_eq!(request.mode, AppMode::Admin);
        assert_eq!(request.user_identity, "root@lab.test");
        assert_eq!(request.output_dir, Some(PathBuf::from("/tmp/out")));
    }
}
