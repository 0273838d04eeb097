use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Result};
use serde::{Serialize, Serializer};

/// Four-part assembly version (`major.minor.build.revision`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u16,
    pub minor: u16,
    pub build: u16,
    pub revision: u16,
}

impl Version {
    pub const fn new(major: u16, minor: u16, build: u16, revision: u16) -> Self {
        Version {
            major,
            minor,
            build,
            revision,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.build, self.revision
        )
    }
}

impl FromStr for Version {
    type Err = anyhow::Error;

    /// Parse `a[.b[.c[.d]]]`; missing parts are zero.
    fn from_str(s: &str) -> Result<Self> {
        let mut parts = [0u16; 4];
        let pieces: Vec<&str> = s.trim().split('.').collect();
        if pieces.len() > 4 {
            bail!("invalid version '{}'", s);
        }
        for (slot, piece) in parts.iter_mut().zip(&pieces) {
            *slot = piece
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid version '{}'", s))?;
        }
        Ok(Version::new(parts[0], parts[1], parts[2], parts[3]))
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Name and version of a module. Used as the dedup key throughout a scan.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ModuleIdentity {
    pub name: String,
    pub version: Version,
}

impl ModuleIdentity {
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        ModuleIdentity {
            name: name.into(),
            version,
        }
    }
}

impl fmt::Display for ModuleIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.version)
    }
}

/// A declared dependency, as written in the referencing module's metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleReference {
    pub identity: ModuleIdentity,
    /// `None` means culture-neutral.
    pub culture: Option<String>,
    /// Eight-byte public key token, when the reference carries one.
    pub public_key_token: Option<Vec<u8>>,
}

impl ModuleReference {
    #[cfg(test)]
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        ModuleReference {
            identity: ModuleIdentity::new(name, version),
            culture: None,
            public_key_token: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.identity.name
    }

    pub fn version(&self) -> Version {
        self.identity.version
    }

    /// Runtime display name, e.g. `Core, Version=2.0.0.0, Culture=neutral, PublicKeyToken=null`.
    pub fn full_name(&self) -> String {
        full_name(
            &self.identity,
            self.culture.as_deref(),
            self.public_key_token.as_deref(),
        )
    }
}

/// Identity plus declared dependencies of a loaded module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDescriptor {
    pub identity: ModuleIdentity,
    pub culture: Option<String>,
    pub public_key_token: Option<Vec<u8>>,
    /// Declaration order is preserved.
    pub dependencies: Vec<ModuleReference>,
}

impl ModuleDescriptor {
    #[cfg(test)]
    pub fn new(identity: ModuleIdentity, dependencies: Vec<ModuleReference>) -> Self {
        ModuleDescriptor {
            identity,
            culture: None,
            public_key_token: None,
            dependencies,
        }
    }

    pub fn full_name(&self) -> String {
        full_name(
            &self.identity,
            self.culture.as_deref(),
            self.public_key_token.as_deref(),
        )
    }
}

fn full_name(identity: &ModuleIdentity, culture: Option<&str>, token: Option<&[u8]>) -> String {
    let token = match token {
        Some(bytes) if !bytes.is_empty() => bytes.iter().map(|b| format!("{:02x}", b)).collect(),
        _ => "null".to_string(),
    };
    format!(
        "{}, Version={}, Culture={}, PublicKeyToken={}",
        identity.name,
        identity.version,
        culture.filter(|c| !c.is_empty()).unwrap_or("neutral"),
        token
    )
}

/// How a dependency edge was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ResolutionSource {
    /// Found in the scanned directory at the declared version.
    Local,
    /// Supplied by the ambient runtime probe.
    Ambient,
    /// Found in the scanned directory at a different version.
    VersionMismatch,
    /// Not found, or present but unreadable.
    NotFound,
}

impl fmt::Display for ResolutionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionSource::Local => write!(f, "Local"),
            ResolutionSource::Ambient => write!(f, "Ambient"),
            ResolutionSource::VersionMismatch => write!(f, "VersionMismatch"),
            ResolutionSource::NotFound => write!(f, "NotFound"),
        }
    }
}

/// One node of the resolution tree: one per dependency edge, not per unique module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleSummary {
    pub identity: ModuleIdentity,
    pub resolved: bool,
    pub source: ResolutionSource,
    /// Set when this edge points back at a module already on the current descent path.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub cyclic: bool,
    pub children: Vec<ModuleSummary>,
}

impl ModuleSummary {
    pub fn new(identity: ModuleIdentity, resolved: bool, source: ResolutionSource) -> Self {
        ModuleSummary {
            identity,
            resolved,
            source,
            cyclic: false,
            children: Vec::new(),
        }
    }

    /// Root node for a top-level module.
    pub fn root(identity: ModuleIdentity) -> Self {
        Self::new(identity, true, ResolutionSource::Local)
    }

    /// True when this node or any descendant failed to resolve.
    pub fn has_unresolved(&self) -> bool {
        !self.resolved || self.children.iter().any(ModuleSummary::has_unresolved)
    }

    /// True when this node or any descendant came from the ambient probe.
    pub fn has_ambient(&self) -> bool {
        self.source == ResolutionSource::Ambient
            || self.children.iter().any(ModuleSummary::has_ambient)
    }
}

impl fmt::Display for ModuleSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] <- {}", self.identity, self.source)?;
        if self.cyclic {
            write!(f, " (cycle)")?;
        }
        Ok(())
    }
}

/// Forest of per-module summary trees, one root per top-level module scanned.
pub type ResolutionTree = Vec<ModuleSummary>;
