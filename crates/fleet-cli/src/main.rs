use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "fleet",
    about = "FleetGrid — deployment planner",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Planner configuration
    #[arg(short, long, global = true, default_value = "fleet.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a deployment plan from a manifest and print its summary.
    ///
    /// Without --bind only parsing runs. With --bind every binding stage
    /// runs, packages are compiled and DNS records are published.
    Plan {
        /// Deployment manifest (JSON or TOML)
        #[arg(short, long)]
        manifest: String,
        /// Cloud config holding networks, resource pools and compilation
        #[arg(long)]
        cloud_config: Option<String>,
        /// Static inventory snapshot used for disk placement
        #[arg(short, long)]
        inventory: Option<String>,
        /// Recreate every VM
        #[arg(long)]
        recreate: bool,
        /// Requested job state, as job=state (repeatable)
        #[arg(long = "job-state", value_name = "JOB=STATE")]
        job_states: Vec<String>,
        /// Job rename, as old=new (repeatable)
        #[arg(long = "rename", value_name = "OLD=NEW")]
        renames: Vec<String>,
        /// Run the full binding pipeline
        #[arg(long)]
        bind: bool,
    },
    /// Pick a persistent datastore for a disk of the given size.
    Place {
        #[arg(short, long)]
        inventory: String,
        /// Disk size in MB
        #[arg(short, long)]
        size: u64,
        /// Datacenter name (default: first configured)
        #[arg(short, long)]
        datacenter: Option<String>,
    },
    /// Register stemcells and release versions in the state store.
    Seed {
        /// Stemcell as name/version/cid (repeatable)
        #[arg(long, value_name = "NAME/VERSION/CID")]
        stemcell: Vec<String>,
        /// Release version document (JSON or TOML, repeatable)
        #[arg(long)]
        release: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("fleet=info".parse()?)
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Plan {
            manifest,
            cloud_config,
            inventory,
            recreate,
            job_states,
            renames,
            bind,
        } => {
            let args = commands::plan::PlanArgs {
                config: cli.config,
                manifest,
                cloud_config,
                inventory,
                recreate,
                job_states,
                renames,
                bind,
            };
            commands::plan::plan(args).await
        }
        Commands::Place {
            inventory,
            size,
            datacenter,
        } => commands::place::place(&cli.config, &inventory, size, datacenter.as_deref()),
        Commands::Seed { stemcell, release } => {
            commands::seed::seed(&cli.config, &stemcell, &release)
        }
    }
}
