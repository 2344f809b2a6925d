use clap::{Parser, Subcommand};
use ipam_subnet_tree::output::{print_free_blocks, print_subnets, status_label};
use ipam_subnet_tree::processing::{parse_prefix, parse_prefix_length};
use ipam_subnet_tree::{IpamError, MemoryStore, Settings, SubnetDraft, SubnetTree};
use log::LevelFilter;
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use std::error::Error;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "ipam-subnet-tree")]
#[command(version, about = "IPv4 subnet hierarchy and utilization")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a top-level (major) subnet
    AddRoot {
        prefix: String,
        #[arg(short, long, default_value = "")]
        name: String,
        #[arg(short, long, default_value = "")]
        label: String,
    },

    /// Add a subnet under an existing one
    Add {
        prefix: String,
        /// Declared containing subnet
        #[arg(short, long)]
        under: String,
        #[arg(short, long, default_value = "")]
        name: String,
        #[arg(short, long, default_value = "")]
        label: String,
    },

    /// Break a subnet into equal children of the given length
    Break {
        prefix: String,
        /// New prefix length, e.g. 26 or /26
        length: String,
    },

    /// Delete subnets without children
    Delete {
        #[arg(required = true)]
        prefixes: Vec<String>,
    },

    /// Change the name and/or label of a subnet
    Edit {
        prefix: String,
        #[arg(short, long)]
        name: Option<String>,
        #[arg(short, long)]
        label: Option<String>,
    },

    /// List root subnets, or the children of PREFIX
    Show {
        prefix: Option<String>,
        /// Include free blocks between children
        #[arg(short, long)]
        free: bool,
    },

    /// List unallocated blocks inside a subnet
    Free { prefix: String },

    /// Verify the stored hierarchy
    Check,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Do as little as possible in main.rs as it can't contain any tests
    init_logging()?;
    dotenv::dotenv().ok();
    log::info!("#Start main()");

    let cli = Cli::parse();
    if let Err(e) = run(cli.command).await {
        log::error!("{e}");
        eprintln!("error[{}]: {e}", e.kind());
        std::process::exit(1);
    }
    Ok(())
}

/// log4rs.yml in the working directory, else info level to stderr.
fn init_logging() -> Result<(), Box<dyn Error>> {
    if let Err(e) = log4rs::init_file("log4rs.yml", Default::default()) {
        let stderr = ConsoleAppender::builder()
            .target(Target::Stderr)
            .encoder(Box::new(PatternEncoder::new("{d(%H:%M:%S)} {h({l})} {m}{n}")))
            .build();
        let config = Config::builder()
            .appender(Appender::builder().build("stderr", Box::new(stderr)))
            .build(Root::builder().appender("stderr").build(LevelFilter::Info))?;
        log4rs::init_config(config)?;
        log::debug!("log4rs.yml not loaded: {e}");
    }
    Ok(())
}

async fn run(command: Commands) -> Result<(), IpamError> {
    let settings = Settings::from_env()?;
    let store = Arc::new(MemoryStore::open(&settings.store_file)?);
    let tree = SubnetTree::new(store).with_subdivide_limit(settings.max_subdivide_children);

    match command {
        Commands::AddRoot {
            prefix,
            name,
            label,
        } => {
            let draft = SubnetDraft::named(parse_prefix(&prefix)?, &name, &label);
            let subnet = tree.add_root(draft).await?;
            println!("added root {}", subnet.prefix);
        }
        Commands::Add {
            prefix,
            under,
            name,
            label,
        } => {
            let draft = SubnetDraft::named(parse_prefix(&prefix)?, &name, &label);
            let subnet = tree.place(draft, parse_prefix(&under)?).await?;
            let parent = subnet.parent.unwrap_or(subnet.root);
            println!("added {} under {parent}", subnet.prefix);
        }
        Commands::Break { prefix, length } => {
            let prefix = parse_prefix(&prefix)?;
            let children = tree.subdivide(prefix, parse_prefix_length(&length)?).await?;
            print_subnets(&children, &[], &settings.label_name);
        }
        Commands::Delete { prefixes } => {
            let prefixes = prefixes
                .iter()
                .map(String::as_str)
                .map(parse_prefix)
                .collect::<Result<Vec<_>, _>>()?;
            let deleted = tree.delete(&prefixes).await?;
            println!("deleted {deleted} subnet(s)");
        }
        Commands::Edit {
            prefix,
            name,
            label,
        } => {
            let subnet = tree.update_details(parse_prefix(&prefix)?, name, label).await?;
            println!(
                "{} name='{}' {}='{}'",
                subnet.prefix, subnet.name, settings.label_name, subnet.label
            );
        }
        Commands::Show { prefix: None, .. } => {
            print_subnets(&tree.roots().await?, &[], &settings.label_name);
        }
        Commands::Show {
            prefix: Some(prefix),
            free,
        } => {
            let subnet = tree.get(parse_prefix(&prefix)?).await?;
            println!(
                "# {} '{}' offline {:.2}% online {}",
                subnet.prefix,
                subnet.name,
                subnet.offline_utilization,
                status_label(subnet.online_status)
            );
            let children = tree.children(subnet.prefix).await?;
            let gaps = if free {
                tree.free_blocks(subnet.prefix).await?
            } else {
                Vec::new()
            };
            print_subnets(&children, &gaps, &settings.label_name);
        }
        Commands::Free { prefix } => {
            let prefix = parse_prefix(&prefix)?;
            print_free_blocks(prefix, &tree.free_blocks(prefix).await?);
        }
        Commands::Check => {
            let count = tree.check_integrity().await?;
            println!("ok: {count} subnet(s) checked");
        }
    }
    Ok(())
}
