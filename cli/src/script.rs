//! Line-oriented edit-script format consumed by the `edit` subcommand.
//!
//! Each non-empty, non-comment (`#`) line is one editor operation:
//!
//! ```text
//! add-group <name> <max_size_bytes>
//! remove-group <name>
//! resize-group <name> <max_size_bytes>
//! add-partition <name> <group> <attributes>
//! remove-partition <name>
//! resize-partition <name> <size_bytes>
//! resize-block-device <size_bytes>
//! reorder <name>[,<name>...]
//! compact
//! ```

use anyhow::{bail, Context, Result};
use lp_metadata::LpMetadataEditor;

pub fn apply_script(editor: &mut LpMetadataEditor, script: &str) -> Result<()> {
    for (lineno, raw) in script.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        apply_line(editor, line).with_context(|| format!("line {}: {raw}", lineno + 1))?;
    }
    Ok(())
}

fn apply_line(editor: &mut LpMetadataEditor, line: &str) -> Result<()> {
    let mut parts = line.split_whitespace();
    let cmd = parts.next().unwrap_or("");
    match cmd {
        "add-group" => {
            let name = next_arg(&mut parts, "name")?;
            let max_size: u64 = next_arg(&mut parts, "max_size")?.parse()?;
            editor.add_group(name, max_size)?;
        }
        "remove-group" => {
            let name = next_arg(&mut parts, "name")?;
            editor.remove_group(name)?;
        }
        "resize-group" => {
            let name = next_arg(&mut parts, "name")?;
            let max_size: u64 = next_arg(&mut parts, "max_size")?.parse()?;
            editor.resize_group(name, max_size)?;
        }
        "add-partition" => {
            let name = next_arg(&mut parts, "name")?;
            let group = next_arg(&mut parts, "group")?;
            let attributes: u32 = next_arg(&mut parts, "attributes")?.parse()?;
            editor.add_partition(name, group, attributes)?;
        }
        "remove-partition" => {
            let name = next_arg(&mut parts, "name")?;
            editor.remove_partition(name);
        }
        "resize-partition" => {
            let name = next_arg(&mut parts, "name")?;
            let size: u64 = next_arg(&mut parts, "size")?.parse()?;
            editor.resize_partition(name, size)?;
        }
        "resize-block-device" => {
            let size: u64 = next_arg(&mut parts, "size")?.parse()?;
            editor.resize_block_device(size)?;
        }
        "reorder" => {
            let list = next_arg(&mut parts, "names")?;
            let names: Vec<String> = list.split(',').map(|s| s.to_string()).collect();
            editor.reorder_partitions(&names);
        }
        "compact" => {
            editor.compact_partitions()?;
        }
        other => bail!("unrecognized edit-script command: {other}"),
    }
    Ok(())
}

fn next_arg<'a>(parts: &mut impl Iterator<Item = &'a str>, what: &str) -> Result<&'a str> {
    parts.next().with_context(|| format!("missing argument: {what}"))
}
