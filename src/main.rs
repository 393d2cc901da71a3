use std::{
    fs::{File, OpenOptions},
    io::{self, Write},
    sync::Arc,
};

use clap::{value_parser, Arg, ArgAction, Command as App};
use log::{info, LevelFilter};

use blk::{major, BlockLayer, BufferCache, RamDisk, BLOCK_SIZE, RAMDISK_DEV};
use device::BlockFile;

mod blk;
mod device;
mod logging;

fn main() {
    ramdisk_boot().expect("Error when loading ram disk");
}

fn parse_dev(s: &str) -> io::Result<u16> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    u16::from_str_radix(digits, 16)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, format!("{}: {}", s, err)))
}

/// 虚拟盘大小以 KiB 给出
fn ramdisk_bytes(kib: usize) -> io::Result<usize> {
    kib.checked_mul(1024).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("ram disk of {} KiB is too large", kib),
        )
    })
}

fn ramdisk_boot() -> io::Result<()> {
    // 从命令行参数中获取映像文件名和虚拟盘大小
    let matches = App::new("RamDisk Loader")
        .arg(
            // 软盘映像, 文件系统映像从第 256 块开始
            Arg::new("image")
                .short('i')
                .long("image")
                .required(true)
                .help("Floppy image holding a root filesystem image at block 256"),
        )
        .arg(
            Arg::new("ramdisk")
                .short('r')
                .long("ramdisk")
                .value_parser(value_parser!(usize))
                .default_value("1024")
                .help("Ram disk size in KiB"),
        )
        .arg(
            Arg::new("root")
                .long("root-dev")
                .default_value("0x0200")
                .help("Root device number the image is attached as (hex)"),
        )
        .arg(
            // 加载成功后把虚拟盘的内容写到这个文件
            Arg::new("dump")
                .short('d')
                .long("dump")
                .help("Write the loaded ram disk to this file"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Log every request"),
        )
        .get_matches();

    let level = if matches.get_flag("verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    logging::init(level);

    let image_path = matches
        .get_one::<String>("image")
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "missing --image"))?;
    let ramdisk_kib = matches.get_one::<usize>("ramdisk").copied().unwrap_or(1024);
    let ramdisk_len = ramdisk_bytes(ramdisk_kib)?;
    let root_dev = parse_dev(
        matches
            .get_one::<String>("root")
            .map(String::as_str)
            .unwrap_or("0x0200"),
    )?;

    // 块设备层初始化: 所有请求项空闲, 把映像文件挂接为根设备
    let layer = Arc::new(BlockLayer::new());
    let image = OpenOptions::new().read(true).open(image_path)?;
    layer.register(major(root_dev), Arc::new(BlockFile::new(image)));
    layer.set_root_dev(root_dev);

    let ramdisk = RamDisk::init(&layer, ramdisk_len);
    let cache = BufferCache::new(Arc::clone(&layer));
    ramdisk.load(&cache);

    println!("root device: {:04x}", layer.root_dev());

    if let Some(dump_path) = matches.get_one::<String>("dump") {
        if layer.root_dev() != RAMDISK_DEV {
            info!("no ram disk image loaded, nothing to dump");
            return Ok(());
        }
        // 通过块设备层逐块读出虚拟盘
        let mut out = File::create(dump_path)?;
        for block in 0..ramdisk.blocks() as u32 {
            let bh = cache.bread(RAMDISK_DEV, block).ok_or_else(|| {
                io::Error::new(io::ErrorKind::Other, format!("ram disk block {}", block))
            })?;
            bh.read(|data| out.write_all(&data[..BLOCK_SIZE]))?;
            cache.brelse(bh);
        }
        println!("{} bytes written to {}", ramdisk.length(), dump_path);
    }

    Ok(())
}
