//! Remote endpoint construction for the configured firmware repository

use crate::engine::config::OtaConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseSource {
    api_base: String,
    raw_base: String,
    owner: String,
    name: String,
    branch: String,
    firmware_path: String,
}

impl ReleaseSource {
    pub fn new(api_base: &str, raw_base: &str, owner: &str, name: &str, branch: &str) -> Self {
        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            raw_base: raw_base.trim_end_matches('/').to_string(),
            owner: owner.to_string(),
            name: name.to_string(),
            branch: branch.to_string(),
            firmware_path: String::new(),
        }
    }

    /// Firmware files live under this directory of the repository
    pub fn with_firmware_path(mut self, path: &str) -> Self {
        self.firmware_path = path.trim_matches('/').to_string();
        self
    }

    pub fn from_config(ota: &OtaConfig) -> Self {
        let repo = &ota.github_repo;
        Self::new(&ota.api_base, &ota.raw_base, &repo.owner, &repo.name, &repo.branch)
            .with_firmware_path(&ota.firmware_path)
    }

    pub fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn latest_release_url(&self) -> String {
        format!("{}/repos/{}/releases/latest", self.api_base, self.slug())
    }

    /// Newest release only; the list is parsed in one piece
    pub fn releases_url(&self) -> String {
        format!("{}/repos/{}/releases?per_page=1", self.api_base, self.slug())
    }

    pub fn contents_url(&self) -> String {
        format!(
            "{}/repos/{}/contents/{}?ref={}",
            self.api_base,
            self.slug(),
            self.firmware_path,
            self.branch
        )
    }

    /// Repository-relative path of a firmware file
    pub fn remote_path(&self, filename: &str) -> String {
        if self.firmware_path.is_empty() {
            filename.to_string()
        } else {
            format!("{}/{}", self.firmware_path, filename)
        }
    }

    /// Raw content URL for a repository-relative path on the configured branch
    pub fn raw_url(&self, remote_path: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            self.raw_base,
            self.slug(),
            self.branch,
            remote_path.trim_start_matches('/')
        )
    }
}
