//! Artifact identity.
//!
//! Every payload flowing through the pipeline maps to one `(type, id)` pair
//! drawn from a closed set of artifact families.

use serde::{Deserialize, Serialize};

/// The closed set of artifact families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactType {
    KojiBuild,
    KojiBuildCs,
    CoprBuild,
    BrewBuild,
    RedhatModule,
    FedoraModule,
    ProductmdCompose,
    RedhatContainerImage,
    DistGitPr,
}

/// Which payload sub-object an artifact family owns on its document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadSlot {
    RpmBuild,
    MbsBuild,
    DistGitPr,
    ProductmdCompose,
}

impl ArtifactType {
    /// Wire name, e.g. `"brew-build"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactType::KojiBuild => "koji-build",
            ArtifactType::KojiBuildCs => "koji-build-cs",
            ArtifactType::CoprBuild => "copr-build",
            ArtifactType::BrewBuild => "brew-build",
            ArtifactType::RedhatModule => "redhat-module",
            ArtifactType::FedoraModule => "fedora-module",
            ArtifactType::ProductmdCompose => "productmd-compose",
            ArtifactType::RedhatContainerImage => "redhat-container-image",
            ArtifactType::DistGitPr => "dist-git-pr",
        }
    }

    /// The document payload slot for this family.
    pub fn payload_slot(&self) -> PayloadSlot {
        match self {
            ArtifactType::KojiBuild
            | ArtifactType::KojiBuildCs
            | ArtifactType::CoprBuild
            | ArtifactType::BrewBuild
            | ArtifactType::RedhatContainerImage => PayloadSlot::RpmBuild,
            ArtifactType::RedhatModule | ArtifactType::FedoraModule => PayloadSlot::MbsBuild,
            ArtifactType::ProductmdCompose => PayloadSlot::ProductmdCompose,
            ArtifactType::DistGitPr => PayloadSlot::DistGitPr,
        }
    }

    /// Modules are identified by MBS build id rather than task id.
    pub fn is_module(&self) -> bool {
        matches!(
            self,
            ArtifactType::RedhatModule | ArtifactType::FedoraModule
        )
    }
}

impl std::fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ArtifactType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "koji-build" => Ok(ArtifactType::KojiBuild),
            "koji-build-cs" => Ok(ArtifactType::KojiBuildCs),
            "copr-build" => Ok(ArtifactType::CoprBuild),
            "brew-build" => Ok(ArtifactType::BrewBuild),
            "redhat-module" => Ok(ArtifactType::RedhatModule),
            "fedora-module" => Ok(ArtifactType::FedoraModule),
            "productmd-compose" => Ok(ArtifactType::ProductmdCompose),
            "redhat-container-image" => Ok(ArtifactType::RedhatContainerImage),
            "dist-git-pr" => Ok(ArtifactType::DistGitPr),
            other => Err(format!("unknown artifact type: {other}")),
        }
    }
}
