use clap::{Arg, ArgAction, Command};
use clap_num::maybe_hex;
use env_logger::Builder;
use exhume_body::Body;
use exhume_jffs2::inode::InodeDataRecord;
use exhume_jffs2::patch::patch_inodes;
use exhume_jffs2::reassemble::ReassemblyPolicy;
use exhume_jffs2::scanner::ScanConfig;
use exhume_jffs2::{parse, read_image, ParsedImage};
use log::{error, info, LevelFilter};
use prettytable::{Cell, Row, Table};
use std::error::Error;
use std::io::{Seek, SeekFrom};
use std::path::Path;

struct Options<'a> {
    file_path: &'a str,
    format: &'a str,
    offset: u64,
    page_size: usize,
    policy: ReassemblyPolicy,
    list: bool,
    target_file: Option<&'a String>,
    inode: Option<u32>,
    dump_dir: Option<&'a String>,
    extract: Option<&'a String>,
    new_data: Option<&'a String>,
    output: Option<&'a String>,
    json: bool,
}

fn init_logger(verbose: bool) {
    if std::env::var("RUST_LOG").is_ok() {
        env_logger::init();
        return;
    }
    let level = if verbose {
        LevelFilter::Info
    } else {
        LevelFilter::Warn
    };
    Builder::new().filter(None, level).init();
}

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(err) => error!("JSON serialization failed: {}", err),
    }
}

fn summary_table(parsed: &ParsedImage) -> String {
    let s = &parsed.summary;
    let mut table = Table::new();
    let rows = [
        ("Nodes", s.total_nodes),
        ("Inode nodes", s.inode_nodes),
        ("Dirent nodes", s.dirent_nodes),
        ("Padding / clean markers", s.padding_nodes),
        ("Other nodes", s.other_nodes),
        ("Payload errors", s.payload_errors),
        ("Resyncs", s.resyncs),
        ("Bytes skipped", s.bytes_skipped),
        ("Inodes", parsed.inodes.len()),
        ("Named inodes", parsed.dirents.len()),
    ];
    for (name, value) in rows {
        table.add_row(Row::new(vec![Cell::new(name), Cell::new(&value.to_string())]));
    }
    table.to_string()
}

/// Inodes the user pointed at, either by number or by path.
fn targets(parsed: &ParsedImage, opts: &Options) -> Vec<u32> {
    match (opts.inode, opts.target_file) {
        (Some(ino), _) => vec![ino],
        (None, Some(path)) => parsed.find_inodes_by_path(path),
        (None, None) => Vec::new(),
    }
}

fn show_records(parsed: &ParsedImage, ino: u32, json: bool) {
    let resolved = parsed.resolve_path(ino);
    let fragments = parsed.inodes.fragments(ino).unwrap_or(&[]);
    if json {
        let records: Vec<_> = fragments.iter().map(|r| r.to_json()).collect();
        print_json(&serde_json::json!({
            "ino": ino,
            "path": resolved.path,
            "complete_path": resolved.complete,
            "dirent": parsed.dirents.get(ino).map(|d| d.to_json()),
            "records": records,
        }));
    } else {
        println!("{} (inode {}, {} record(s))", resolved.path, ino, fragments.len());
        for record in fragments {
            println!("{}", record.to_string());
        }
    }
}

fn process_image(opts: &Options) -> Result<(), Box<dyn Error>> {
    let config = ScanConfig::with_page_size(opts.page_size)?;
    let mut body = Body::new_from(opts.file_path.to_string(), opts.format, Some(0));
    body.seek(SeekFrom::Start(opts.offset))?;
    let image = read_image(&mut body)?;

    let parsed = parse(&image, &config);

    if opts.list {
        if opts.target_file.is_some() || opts.inode.is_some() {
            for ino in targets(&parsed, opts) {
                show_records(&parsed, ino, opts.json);
            }
        } else if opts.json {
            let files: Vec<_> = parsed.files().iter().map(|f| f.to_json()).collect();
            print_json(&serde_json::Value::Array(files));
        } else {
            println!("{}", parsed.files_table());
        }
        return Ok(());
    }

    if let Some(dir) = opts.dump_dir {
        info!("Dumping files to {}", dir);
        let report = parsed.dump_all(Path::new(dir), opts.policy)?;
        if opts.json {
            print_json(&serde_json::to_value(&report)?);
        } else {
            println!(
                "{} file(s) written ({} symlink(s)), {} director(ies), {} empty, {} failed",
                report.written.len(),
                report.symlinks,
                report.directories,
                report.empty,
                report.failed.len()
            );
        }
        return Ok(());
    }

    let selected = targets(&parsed, opts);
    if opts.inode.is_some() || opts.target_file.is_some() {
        if selected.is_empty() {
            return Err("no inode matches the requested file".into());
        }

        if let (Some(new_data), Some(output)) = (opts.new_data, opts.output) {
            if opts.format != "raw" {
                return Err("patching is only supported on raw images".into());
            }
            let content = std::fs::read(new_data)?;
            if selected.len() > 1 {
                info!("{} inodes match, patching all of them", selected.len());
            }
            let chains: Vec<(u32, &[InodeDataRecord])> = selected
                .iter()
                .map(|&ino| (ino, parsed.inodes.fragments(ino).unwrap_or(&[])))
                .collect();
            let reports = patch_inodes(opts.file_path, output, opts.offset, &chains, &content)?;
            for (ino, report) in &reports {
                if opts.json {
                    print_json(&serde_json::json!({ "ino": ino, "report": report }));
                } else {
                    for f in &report.fragments {
                        println!(
                            "inode {} raw 0x{:x} offset 0x{:x} csize 0x{:x} -> 0x{:x}: {:?}",
                            ino, f.raw_offset, f.offset, f.original_csize, f.new_csize, f.status
                        );
                    }
                }
                if report.needs_growth() {
                    error!("Inode {}: some extents are too small for the new content", ino);
                }
            }
            return Ok(());
        }

        for ino in selected {
            if let Some(out) = opts.extract {
                let data = parsed
                    .extract_file(ino, opts.policy)
                    .ok_or_else(|| format!("inode {} has no data node", ino))?;
                std::fs::write(out, &data)?;
                info!("Inode {} written to {} (0x{:x} bytes)", ino, out, data.len());
            } else {
                show_records(&parsed, ino, opts.json);
            }
        }
        return Ok(());
    }

    if opts.json {
        print_json(&serde_json::to_value(&parsed.summary)?);
    } else {
        println!("{}", summary_table(&parsed));
    }
    Ok(())
}

fn main() {
    let matches = Command::new("exhume_jffs2")
        .version("0.1.0")
        .author("ForensicXlab")
        .about("Exhume files and directories from a JFFS2 flash image.")
        .arg(
            Arg::new("body")
                .short('b')
                .long("body")
                .value_parser(clap::value_parser!(String))
                .required(true)
                .help("The path to the body to exhume."),
        )
        .arg(
            Arg::new("format")
                .short('f')
                .long("format")
                .value_parser(clap::value_parser!(String))
                .default_value("raw")
                .help("The format of the file, either 'raw' or 'ewf'."),
        )
        .arg(
            Arg::new("offset")
                .short('o')
                .long("offset")
                .value_parser(maybe_hex::<u64>)
                .default_value("0")
                .help("The JFFS2 partition starts at address 0x...."),
        )
        .arg(
            Arg::new("page_size")
                .short('p')
                .long("page-size")
                .value_parser(maybe_hex::<usize>)
                .default_value("0x200")
                .help("Flash page size used for node padding."),
        )
        .arg(
            Arg::new("list")
                .short('l')
                .long("list")
                .action(ArgAction::SetTrue)
                .help("List recovered files, or the records of --file."),
        )
        .arg(
            Arg::new("file")
                .short('F')
                .long("file")
                .value_parser(clap::value_parser!(String))
                .help("Target file path inside the image, e.g. /etc/passwd."),
        )
        .arg(
            Arg::new("inode")
                .short('i')
                .long("inode")
                .value_parser(maybe_hex::<u32>)
                .help("Target inode number."),
        )
        .arg(
            Arg::new("dump")
                .short('d')
                .long("dump")
                .value_parser(clap::value_parser!(String))
                .help("Dump every file into this directory."),
        )
        .arg(
            Arg::new("extract")
                .short('x')
                .long("extract")
                .value_parser(clap::value_parser!(String))
                .help("Write the content of the target to this file."),
        )
        .arg(
            Arg::new("policy")
                .long("policy")
                .value_parser(["overlay", "sequential"])
                .default_value("overlay")
                .help("How fragments are reassembled."),
        )
        .arg(
            Arg::new("new_data")
                .short('n')
                .long("new-data")
                .value_parser(clap::value_parser!(String))
                .requires("output")
                .help("File holding the new content of the target."),
        )
        .arg(
            Arg::new("output")
                .short('O')
                .long("output")
                .value_parser(clap::value_parser!(String))
                .requires("new_data")
                .help("Where to write the patched copy of the image."),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("json")
                .short('j')
                .long("json")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let verbose = matches.get_flag("verbose");
    init_logger(verbose);

    let policy = match matches
        .get_one::<String>("policy")
        .map(|p| p.parse::<ReassemblyPolicy>())
    {
        Some(Ok(policy)) => policy,
        Some(Err(err)) => {
            eprintln!("{}", err);
            std::process::exit(1);
        }
        None => ReassemblyPolicy::default(),
    };

    let (file_path, format) = match (
        matches.get_one::<String>("body"),
        matches.get_one::<String>("format"),
    ) {
        (Some(body), Some(format)) => (body, format),
        _ => {
            eprintln!("--body is required");
            std::process::exit(1);
        }
    };

    let opts = Options {
        file_path,
        format,
        offset: matches.get_one::<u64>("offset").copied().unwrap_or(0),
        page_size: matches.get_one::<usize>("page_size").copied().unwrap_or(0x200),
        policy,
        list: matches.get_flag("list"),
        target_file: matches.get_one::<String>("file"),
        inode: matches.get_one::<u32>("inode").copied(),
        dump_dir: matches.get_one::<String>("dump"),
        extract: matches.get_one::<String>("extract"),
        new_data: matches.get_one::<String>("new_data"),
        output: matches.get_one::<String>("output"),
        json: matches.get_flag("json"),
    };

    if let Err(err) = process_image(&opts) {
        eprintln!("{}", err);
        std::process::exit(1);
    }
}
