//! Archive Sanitizer (spec §4.1).
//!
//! Pure function over bytes: accepts a (possibly gzip-framed) tar stream and
//! yields an uncompressed, normalized tar stream safe to extract inside a
//! container. Rejects anything that doesn't fit the narrow "regular file or
//! directory, relative path, no traversal" shape.

use std::io::Read;

use tar::{EntryType, Header};

use crate::error::SandboxError;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Normalize a tar member path, rejecting anything unsafe.
///
/// Strips a leading `./`, skips empty/root entries (returns `Ok(None)`),
/// and rejects absolute paths or any `..` component.
fn normalize_path(raw: &std::path::Path) -> Result<Option<String>, SandboxError> {
    let raw_str = raw.to_string_lossy();

    if raw_str.is_empty() || raw_str == "." || raw_str == "./" {
        return Ok(None);
    }

    if raw.is_absolute() {
        return Err(SandboxError::InvalidInput(format!(
            "archive member has an absolute path: {raw_str}"
        )));
    }

    let mut out = std::path::PathBuf::new();
    for component in raw.components() {
        match component {
            std::path::Component::CurDir => {}
            std::path::Component::Normal(part) => out.push(part),
            std::path::Component::ParentDir => {
                return Err(SandboxError::InvalidInput(format!(
                    "archive member contains a path traversal segment: {raw_str}"
                )));
            }
            std::path::Component::RootDir | std::path::Component::Prefix(_) => {
                return Err(SandboxError::InvalidInput(format!(
                    "archive member has an absolute path: {raw_str}"
                )));
            }
        }
    }

    let normalized = out.to_string_lossy().into_owned();
    if normalized.is_empty() {
        Ok(None)
    } else {
        Ok(Some(normalized))
    }
}

/// Derive the sanitized output mode from an input mode, mirroring
/// `chmod -R a+rX,u+w`: mask to the 9 permission bits, clear setuid/setgid/
/// sticky, add `a+r` and `u+w`, and set `a+x` iff the entry is a directory
/// or any execute bit was present in the input.
fn sanitize_mode(input_mode: u32, is_dir: bool) -> u32 {
    let perm_bits = input_mode & 0o777;
    let any_exec = perm_bits & 0o111 != 0;

    let mut mode = perm_bits | 0o444 | 0o200;
    if is_dir || any_exec {
        mode |= 0o111;
    }
    mode
}

/// Sanitize a (possibly gzip-compressed) tar archive per spec §4.1.
///
/// # Errors
///
/// Returns [`SandboxError::InvalidInput`] when the input is not a valid tar
/// stream, contains a disallowed member type, or a rejected path.
pub fn sanitize_archive(input: &[u8], run_uid: u32, run_gid: u32) -> Result<Vec<u8>, SandboxError> {
    let tar_bytes: std::borrow::Cow<'_, [u8]> = if input.starts_with(&GZIP_MAGIC) {
        let mut decoder = flate2::read::MultiGzDecoder::new(input);
        let mut buf = Vec::new();
        decoder
            .read_to_end(&mut buf)
            .map_err(|e| SandboxError::InvalidInput(format!("invalid gzip stream: {e}")))?;
        std::borrow::Cow::Owned(buf)
    } else {
        std::borrow::Cow::Borrowed(input)
    };

    let mut archive = tar::Archive::new(&tar_bytes[..]);
    let mut out: Vec<u8> = Vec::new();
    {
        let mut builder = tar::Builder::new(&mut out);

        let entries = archive
            .entries()
            .map_err(|e| SandboxError::InvalidInput(format!("malformed tar archive: {e}")))?;

        for entry in entries {
            let mut entry =
                entry.map_err(|e| SandboxError::InvalidInput(format!("unreadable tar entry: {e}")))?;

            let entry_type = entry.header().entry_type();
            let is_dir = entry_type == EntryType::Directory;
            if !is_dir && entry_type != EntryType::Regular {
                return Err(SandboxError::InvalidInput(format!(
                    "disallowed archive member type: {entry_type:?}"
                )));
            }

            let raw_path = entry
                .path()
                .map_err(|e| SandboxError::InvalidInput(format!("unreadable tar entry path: {e}")))?
                .into_owned();
            let Some(path) = normalize_path(&raw_path)? else {
                continue;
            };

            let input_mode = entry
                .header()
                .mode()
                .map_err(|e| SandboxError::InvalidInput(format!("unreadable tar entry mode: {e}")))?;
            let mode = sanitize_mode(input_mode, is_dir);

            let mut contents = Vec::new();
            entry
                .read_to_end(&mut contents)
                .map_err(|e| SandboxError::InvalidInput(format!("unreadable tar entry contents: {e}")))?;

            let mut header = Header::new_gnu();
            header.set_entry_type(entry_type);
            header.set_mode(mode);
            header.set_uid(u64::from(run_uid));
            header.set_gid(u64::from(run_gid));
            header.set_username("").ok();
            header.set_groupname("").ok();
            header.set_mtime(0);
            header.set_size(if is_dir { 0 } else { contents.len() as u64 });
            header.set_cksum();

            builder
                .append_data(&mut header, &path, &contents[..])
                .map_err(|e| SandboxError::InvalidInput(format!("failed to re-emit entry {path}: {e}")))?;
        }

        builder
            .finish()
            .map_err(|e| SandboxError::InvalidInput(format!("failed to finalize sanitized archive: {e}")))?;
    }

    Ok(out)
}
