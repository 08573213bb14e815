use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use colored::Colorize;

use loam_control::Payload;
use loam_pack::PackIndex;

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Ppcf(args) => cmd_ppcf(args),
        Command::Ppidx(args) => cmd_ppidx(args),
        Command::Stat(args) => cmd_stat(args),
    }
}

fn load_index(base: &str) -> anyhow::Result<PackIndex> {
    let idx_path = Path::new(base).with_extension("idx");
    let data = std::fs::read(&idx_path)
        .with_context(|| format!("reading index {}", idx_path.display()))?;
    PackIndex::from_bytes(&data).with_context(|| format!("parsing index {}", idx_path.display()))
}

fn cmd_ppcf(args: PpcfArgs) -> anyhow::Result<()> {
    let data = std::fs::read(&args.path)
        .with_context(|| format!("reading control file {}", args.path))?;
    let payload = if args.strict_v5 {
        Payload::of_bin_string_v5_only(&data)
    } else {
        Payload::of_bin_string(&data)
    }
    .with_context(|| format!("parsing control file {}", args.path))?;

    println!("{}", serde_json::to_string_pretty(&payload.to_json()?)?);
    Ok(())
}

fn cmd_ppidx(args: PpidxArgs) -> anyhow::Result<()> {
    let index = load_index(&args.base)?;
    for entry in index.entries() {
        println!("{entry}");
    }
    Ok(())
}

fn cmd_stat(args: StatArgs) -> anyhow::Result<()> {
    let index = load_index(&args.base)?;
    let pack_path = Path::new(&args.base).with_extension("pack");
    let pack_bytes = std::fs::metadata(&pack_path)
        .map(|m| m.len())
        .with_context(|| format!("reading pack {}", pack_path.display()))?;

    let mut per_kind: BTreeMap<String, (usize, u64)> = BTreeMap::new();
    for entry in index.entries() {
        let slot = per_kind.entry(entry.kind.to_string()).or_insert((0, 0));
        slot.0 += 1;
        slot.1 += entry.length as u64;
    }

    println!("{} {}", "pack:".bold(), pack_path.display());
    println!("  entries: {}", index.entry_count().to_string().yellow());
    println!("  bytes: {}", pack_bytes.to_string().yellow());
    for (kind, (count, bytes)) in &per_kind {
        println!("  {} {} entries, {} bytes", format!("{kind}:").cyan(), count, bytes);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use loam_pack::{EntryKind, IndexEntry};
    use loam_types::ObjectHash;

    #[test]
    fn ppcf_roundtrips_a_written_control_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.control");
        std::fs::write(&path, Payload::init().to_bin_string()).unwrap();

        cmd_ppcf(PpcfArgs {
            path: path.to_string_lossy().into_owned(),
            strict_v5: true,
        })
        .unwrap();
    }

    #[test]
    fn ppcf_fails_on_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.control");
        let mut bytes = Payload::init().to_bin_string();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        let result = cmd_ppcf(PpcfArgs {
            path: path.to_string_lossy().into_owned(),
            strict_v5: false,
        });
        assert!(result.is_err());
    }

    #[test]
    fn ppidx_and_stat_read_an_index() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("store");

        let entries = vec![(
            IndexEntry {
                hash: ObjectHash::from_bytes(b"entry"),
                offset: 8,
                length: 20,
                kind: EntryKind::Contents,
            },
            7,
        )];
        let index = PackIndex::build(entries, [0u8; 32]);
        std::fs::write(base.with_extension("idx"), index.to_bytes()).unwrap();
        std::fs::write(base.with_extension("pack"), b"LMPK\x00\x00\x00\x01data").unwrap();

        let base_str = base.to_string_lossy().into_owned();
        cmd_ppidx(PpidxArgs { base: base_str.clone() }).unwrap();
        cmd_stat(StatArgs { base: base_str }).unwrap();
    }
}
