use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use super::{Batch, SourceFile};

/// Groups selected files into request-sized payloads by greedy bin-packing.
///
/// Files are packed in the order given (stable path order from the
/// selector) and never split, so reported line numbers always refer to
/// real lines. A single file larger than the budget becomes its own batch,
/// flagged `oversized`.
pub struct Batcher {
    budget: usize,
}

impl Batcher {
    pub fn new(budget: usize) -> Self {
        Self { budget }
    }

    pub fn build(&self, files: &[SourceFile], root: &Path) -> Vec<Batch> {
        let mut batches: Vec<Batch> = Vec::new();
        let mut current_files: Vec<SourceFile> = Vec::new();
        let mut current_payload = String::new();

        let mut flush =
            |files: &mut Vec<SourceFile>, payload: &mut String, batches: &mut Vec<Batch>| {
                if files.is_empty() {
                    return;
                }
                let payload = std::mem::take(payload);
                batches.push(Batch {
                    index: batches.len(),
                    files: std::mem::take(files),
                    payload_size: payload.len(),
                    payload,
                    oversized: false,
                });
            };

        for file in files {
            let absolute = root.join(&file.path);
            let content = match fs::read(&absolute) {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(err) => {
                    warn!(path = %absolute.display(), error = %err, "cannot read file, skipping");
                    continue;
                }
            };
            let entry = format!("// File: {}\n{}\n", file.path.display(), content);

            if entry.len() > self.budget {
                // Oversized file: close whatever is pending, then emit the
                // file alone so the provider can truncate rather than fail.
                flush(&mut current_files, &mut current_payload, &mut batches);
                debug!(path = %file.path.display(), size = entry.len(), "file exceeds context budget");
                batches.push(Batch {
                    index: batches.len(),
                    files: vec![file.clone()],
                    payload_size: entry.len(),
                    payload: entry,
                    oversized: true,
                });
                continue;
            }

            if current_payload.len() + entry.len() > self.budget && !current_files.is_empty() {
                flush(&mut current_files, &mut current_payload, &mut batches);
            }
            current_files.push(file.clone());
            current_payload.push_str(&entry);
        }

        flush(&mut current_files, &mut current_payload, &mut batches);
        batches
    }
}
