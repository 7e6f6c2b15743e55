mod script;

use std::fs::File;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use lp_metadata::{read_image, write_image, LpMetadataEditor};

#[derive(Parser)]
#[command(name = "lp")]
#[command(about = "Android logical-partition (super image) metadata toolkit", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print geometry, header, and table contents for a slot.
    Dump {
        image: PathBuf,
        #[arg(short, long, default_value_t = 0)]
        slot: u32,
    },
    /// Read every slot and report which ones checksum-verify.
    Verify {
        image: PathBuf,
        #[arg(short, long, default_value_t = 2)]
        slots: u32,
    },
    /// Apply an edit script to a fresh or existing layout and write the result.
    Edit {
        /// Existing image to load metadata from; omit with --fresh to start empty.
        #[arg(long)]
        image: Option<PathBuf>,
        /// Start from a freshly constructed layout instead of reading `--image`.
        #[arg(long)]
        fresh: bool,
        /// Device size in bytes, used only with --fresh.
        #[arg(long, default_value_t = 16 * 1024 * 1024 * 1024)]
        device_size: u64,
        /// Per-slot metadata capacity in bytes.
        #[arg(long, default_value_t = 65536)]
        metadata_max_size: u32,
        /// Number of metadata slots.
        #[arg(long, default_value_t = 2)]
        slot_count: u32,
        /// Edit-script file; see `script.rs` for the command grammar.
        script: PathBuf,
        /// Destination image.
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Dump { image, slot } => dump(&image, slot),
        Commands::Verify { image, slots } => verify(&image, slots),
        Commands::Edit {
            image,
            fresh,
            device_size,
            metadata_max_size,
            slot_count,
            script,
            output,
        } => edit(image, fresh, device_size, metadata_max_size, slot_count, &script, &output),
    }
}

fn dump(image: &PathBuf, slot: u32) -> Result<()> {
    let mut file = File::open(image).with_context(|| format!("opening {}", image.display()))?;
    let metadata = read_image(&mut file, slot)?;

    println!("geometry:");
    println!("  metadata_max_size:  {}", metadata.geometry.metadata_max_size);
    println!("  metadata_slot_count: {}", metadata.geometry.metadata_slot_count);
    println!("  logical_block_size: {}", metadata.geometry.logical_block_size);
    println!(
        "header: version {}.{}, {} partitions, {} extents, {} groups, {} block devices",
        metadata.header.major_version,
        metadata.header.minor_version,
        metadata.partitions.len(),
        metadata.extents.len(),
        metadata.groups.len(),
        metadata.block_devices.len(),
    );

    println!("groups:");
    for g in &metadata.groups {
        println!("  {} (flags={:#x}, max_size={})", g.name.get_name(), g.flags, g.maximum_size);
    }

    println!("partitions:");
    for p in &metadata.partitions {
        let extents = &metadata.extents[p.first_extent_index as usize..(p.first_extent_index + p.num_extents) as usize];
        let sectors: u64 = extents.iter().map(|e| e.num_sectors).sum();
        println!(
            "  {} (group_index={}, attributes={:#x}, {} bytes across {} extent(s))",
            p.name.get_name(),
            p.group_index,
            p.attributes,
            sectors * 512,
            extents.len(),
        );
    }

    println!("block devices:");
    for d in &metadata.block_devices {
        println!("  {} ({} bytes, alignment={})", d.partition_name.get_name(), d.size, d.alignment);
    }

    Ok(())
}

fn verify(image: &PathBuf, slots: u32) -> Result<()> {
    let mut file = File::open(image).with_context(|| format!("opening {}", image.display()))?;
    for slot in 0..slots {
        match read_image(&mut file, slot) {
            Ok(metadata) => println!("slot {slot}: ok ({} partitions)", metadata.partitions.len()),
            Err(e) => println!("slot {slot}: FAILED: {e}"),
        }
    }
    Ok(())
}

fn edit(
    image: Option<PathBuf>,
    fresh: bool,
    device_size: u64,
    metadata_max_size: u32,
    slot_count: u32,
    script_path: &PathBuf,
    output: &PathBuf,
) -> Result<()> {
    let mut editor = if fresh {
        LpMetadataEditor::new(device_size, metadata_max_size, slot_count)
    } else {
        let path = image.context("--image is required unless --fresh is given")?;
        let mut file = File::open(&path).with_context(|| format!("opening {}", path.display()))?;
        let metadata = read_image(&mut file, 0)?;
        LpMetadataEditor::from_metadata(&metadata)
    };

    let script_text = std::fs::read_to_string(script_path).with_context(|| format!("reading {}", script_path.display()))?;
    script::apply_script(&mut editor, &script_text)?;

    let metadata = editor.build();
    let mut out = File::create(output).with_context(|| format!("creating {}", output.display()))?;
    write_image(&mut out, &metadata)?;
    println!("wrote {} partitions to {}", metadata.partitions.len(), output.display());
    Ok(())
}
