//! Manifest
//!
//! Append-only registry of live blocks per tier.
//!
//! ## File Format
//! ```text
//! ┌──────────────────────────────────────────┐
//! │ Len: u32 LE │ bincode(Vec<ManifestEdit>) │   one frame per commit
//! ├──────────────────────────────────────────┤
//! │ ... repeated ...                         │
//! └──────────────────────────────────────────┘
//! ```
//!
//! A commit is a single frame, so a torn write loses the whole commit and
//! never half of a compaction.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::BlockDescriptor;
use crate::error::{Result, TierError};

/// Frame header: payload length (4 bytes)
const FRAME_HEADER_SIZE: usize = 4;

/// One change to the set of live blocks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ManifestEdit {
    Add { tier: u32, block: BlockDescriptor },
    Remove { tier: u32, file_name: String },
}

/// Durable record of which block files belong to which tier
pub struct Manifest {
    path: PathBuf,
    file: Mutex<File>,
}

impl Manifest {
    /// Open or create the manifest file
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replay every commit into the live list of `(tier, block)`, in the
    /// order the blocks were added
    ///
    /// A torn final frame is dropped and cut from the file so later appends
    /// start on a frame boundary.
    pub fn load(&self) -> Result<Vec<(u32, BlockDescriptor)>> {
        let file = self.file.lock();
        let mut data = Vec::new();
        {
            let mut reader = File::open(&self.path)?;
            reader.read_to_end(&mut data)?;
        }

        let mut live: Vec<(u32, BlockDescriptor)> = Vec::new();
        let mut pos = 0;
        let mut frames = 0;

        while pos < data.len() {
            if pos + FRAME_HEADER_SIZE > data.len() {
                break;
            }
            let mut len_bytes = [0u8; FRAME_HEADER_SIZE];
            len_bytes.copy_from_slice(&data[pos..pos + FRAME_HEADER_SIZE]);
            let len = u32::from_le_bytes(len_bytes) as usize;

            let start = pos + FRAME_HEADER_SIZE;
            if start + len > data.len() {
                break;
            }

            let edits: Vec<ManifestEdit> = bincode::deserialize(&data[start..start + len])
                .map_err(|e| {
                    TierError::Corruption(format!(
                        "manifest frame {} at offset {}: {}",
                        frames, pos, e
                    ))
                })?;
            for edit in edits {
                Self::apply(&mut live, edit)?;
            }
            pos = start + len;
            frames += 1;
        }

        if pos < data.len() {
            warn!(
                manifest = %self.path.display(),
                torn_bytes = data.len() - pos,
                "dropping torn manifest record"
            );
            file.set_len(pos as u64)?;
            file.sync_all()?;
        }

        debug!(frames, blocks = live.len(), "manifest loaded");
        Ok(live)
    }

    fn apply(live: &mut Vec<(u32, BlockDescriptor)>, edit: ManifestEdit) -> Result<()> {
        match edit {
            ManifestEdit::Add { tier, block } => live.push((tier, block)),
            ManifestEdit::Remove { tier, file_name } => {
                let position = live
                    .iter()
                    .position(|(t, block)| *t == tier && block.file_name == file_name)
                    .ok_or_else(|| {
                        TierError::Corruption(format!(
                            "manifest removes unknown block {} from tier {}",
                            file_name, tier
                        ))
                    })?;
                live.remove(position);
            }
        }
        Ok(())
    }

    /// Record a new block in `tier`
    pub fn append(&self, tier: u32, block: &BlockDescriptor) -> Result<()> {
        self.commit(&[ManifestEdit::Add {
            tier,
            block: block.clone(),
        }])
    }

    /// Record that `file_name` left `tier`
    pub fn remove(&self, tier: u32, file_name: &str) -> Result<()> {
        self.commit(&[ManifestEdit::Remove {
            tier,
            file_name: file_name.to_string(),
        }])
    }

    /// Durably write `edits` as one frame
    ///
    /// On failure the file is cut back to its previous length.
    pub fn commit(&self, edits: &[ManifestEdit]) -> Result<()> {
        if edits.is_empty() {
            return Ok(());
        }

        let payload = bincode::serialize(edits)?;
        let len = u32::try_from(payload.len()).map_err(|_| {
            TierError::Serialization(format!("manifest frame too large: {} bytes", payload.len()))
        })?;

        let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&payload);

        let mut file = self.file.lock();
        let previous_len = file.metadata()?.len();

        let written = match file.write_all(&frame) {
            Ok(()) => file.sync_data(),
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            let _ = file.set_len(previous_len);
            return Err(e.into());
        }

        debug!(edits = edits.len(), "manifest commit");
        Ok(())
    }
}
