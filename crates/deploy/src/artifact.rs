//! Compiled contract artifacts.
//!
//! Artifacts follow the hardhat layout: one `<ContractName>.json` per contract somewhere
//! below the artifacts directory, holding at least the creation `bytecode` and, for
//! contracts calling external libraries, the `linkReferences` that locate the library
//! placeholders inside the bytecode.

use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
};

use alloy_core::primitives::{Address, Bytes};
use anyhow::{Context, Result};
use serde::Deserialize;

/// Position of one library placeholder, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct LinkReference {
    pub start: usize,
    pub length: usize,
}

/// A compiled contract.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    #[serde(default)]
    pub contract_name: String,
    /// Hex creation code, possibly containing `__$...$__` library placeholders.
    pub bytecode: String,
    /// Source file -> library name -> placeholder positions.
    #[serde(default)]
    pub link_references: BTreeMap<String, BTreeMap<String, Vec<LinkReference>>>,
}

impl Artifact {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read artifact from {}", path.display()))?;

        serde_json::from_str(&content)
            .context(format!("Failed to parse artifact {}", path.display()))
    }

    /// Names of the libraries that must be linked before deployment.
    pub fn libraries(&self) -> BTreeSet<&str> {
        self.link_references
            .values()
            .flat_map(|libraries| libraries.keys().map(String::as_str))
            .collect()
    }

    pub fn needs_linking(&self) -> bool {
        self.link_references
            .values()
            .any(|libraries| libraries.values().any(|refs| !refs.is_empty()))
    }

    /// Produce the creation code with every library placeholder replaced by its address.
    pub fn link(&self, libraries: &BTreeMap<String, Address>) -> Result<Bytes> {
        let mut code = self
            .bytecode
            .strip_prefix("0x")
            .unwrap_or(&self.bytecode)
            .to_string();

        if code.is_empty() {
            anyhow::bail!(
                "Artifact {} has no bytecode (abstract contract or interface?)",
                self.contract_name
            );
        }

        // Link offsets index bytes of the hex text, which only holds for ASCII.
        if !code.is_ascii() {
            anyhow::bail!(
                "Bytecode of {} contains non-hex characters",
                self.contract_name
            );
        }

        for references in self.link_references.values() {
            for (library, positions) in references {
                let address = libraries.get(library).with_context(|| {
                    format!(
                        "Missing address for library {library} required by {}",
                        self.contract_name
                    )
                })?;
                let encoded = hex::encode(address);

                for position in positions {
                    if position.length != Address::len_bytes() {
                        anyhow::bail!(
                            "Unexpected link reference length {} for library {library}",
                            position.length
                        );
                    }

                    let start = position.start * 2;
                    let end = start + position.length * 2;
                    if end > code.len() {
                        anyhow::bail!(
                            "Link reference for library {library} is out of bounds in {}",
                            self.contract_name
                        );
                    }

                    code.replace_range(start..end, &encoded);
                }
            }
        }

        if code.contains("__") {
            anyhow::bail!(
                "Bytecode of {} still contains unlinked library placeholders",
                self.contract_name
            );
        }

        let bytes = hex::decode(&code)
            .context(format!("Invalid bytecode hex in artifact {}", self.contract_name))?;

        Ok(Bytes::from(bytes))
    }
}

/// Finds artifacts by contract name below an artifacts directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Locate `<name>.json` below the root.
    ///
    /// Fails when no file or more than one file matches.
    pub fn find(&self, name: &str) -> Result<PathBuf> {
        let file_name = format!("{name}.json");
        let mut matches = Vec::new();
        Self::collect(&self.root, &file_name, &mut matches)?;

        match matches.len() {
            0 => anyhow::bail!(
                "Artifact {name} not found under {}",
                self.root.display()
            ),
            1 => Ok(matches.remove(0)),
            _ => anyhow::bail!(
                "Artifact {name} is ambiguous: {}",
                matches
                    .iter()
                    .map(|path| path.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        }
    }

    /// Load the artifact for `name`.
    pub fn load(&self, name: &str) -> Result<Artifact> {
        let path = self.find(name)?;
        let mut artifact = Artifact::load_from_file(&path)?;
        if artifact.contract_name.is_empty() {
            artifact.contract_name = name.to_string();
        }
        tracing::trace!(contract = name, path = %path.display(), "Artifact loaded");
        Ok(artifact)
    }

    fn collect(dir: &Path, file_name: &str, matches: &mut Vec<PathBuf>) -> Result<()> {
        let entries = std::fs::read_dir(dir)
            .context(format!("Failed to read artifacts directory {}", dir.display()))?;

        for entry in entries {
            let entry = entry.context("Failed to read artifacts directory entry")?;
            let path = entry.path();

            if path.is_dir() {
                // Compiler inputs/outputs, not artifacts.
                if entry.file_name() == "build-info" {
                    continue;
                }
                Self::collect(&path, file_name, matches)?;
            } else if entry.file_name().to_str() == Some(file_name) {
                matches.push(path);
            }
        }

        Ok(())
    }
}
