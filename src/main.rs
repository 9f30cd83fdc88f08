use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use terrarium::config::ServerConfig;
use terrarium::model::{CodeVersion, JobKind};
use terrarium::net::client::ServerClient;
use terrarium::net::message::{JobSubmission, Message, ResourceFormat};
use terrarium::net::registry::ConnectionRegistry;
use terrarium::net::router::ServerContext;
use terrarium::net::server::SocketServer;
use terrarium::persistence::MemoryPersistence;
use terrarium::scheduler::WorkloadEnforcer;
use terrarium::shutdown::install_shutdown_handler;

const CODE_VERSION: CodeVersion = CodeVersion::new(0, 1, 0);

#[derive(Parser, Debug)]
#[command(name = "terrarium")]
#[command(version)]
#[command(about = "A simulation job distribution server")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start a terrarium server
    Server(ServerArgs),

    /// Job submission commands
    Job {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: JobCommands,
    },

    /// Resource upload/download commands
    Resource {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: ResourceCommands,
    },

    /// Worker-side commands
    Worker {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: WorkerCommands,
    },
}

// =============================================================================
// Server Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Port to listen on for worker/client WebSocket connections
    #[arg(long, default_value = "24816")]
    port: u16,

    /// Seconds between workload enforcement passes
    #[arg(long, default_value = "60")]
    enforce_interval_secs: u64,

    /// Seconds without a pledge before a worker is deactivated
    #[arg(long, default_value = "300")]
    stale_worker_timeout_secs: u64,
}

// =============================================================================
// Client Arguments (shared by job, resource, and worker commands)
// =============================================================================

#[derive(Parser, Debug)]
struct ClientArgs {
    /// Server address
    #[arg(long, short = 'a', default_value = "ws://127.0.0.1:24816")]
    addr: String,
}

// =============================================================================
// Job Commands
// =============================================================================

#[derive(clap::Subcommand, Debug)]
enum JobCommands {
    /// Submit a world-creation job
    CreateWorld {
        #[command(flatten)]
        common: JobCommonArgs,
    },
    /// Submit a simulation-run job
    RunSimulation {
        /// Tick the simulation should run until
        end_tick: u64,

        #[command(flatten)]
        common: JobCommonArgs,
    },
}

#[derive(Parser, Debug)]
struct JobCommonArgs {
    /// Scheduling priority; higher is more urgent
    #[arg(long, default_value = "0")]
    priority: i32,

    /// Job ids that must complete before this one may run
    #[arg(long = "depends-on")]
    dependencies: Vec<Uuid>,

    /// Resource ids this job reads
    #[arg(long = "input")]
    input_resources: Vec<Uuid>,

    /// Resource ids this job produces
    #[arg(long = "output")]
    output_resources: Vec<Uuid>,
}

// =============================================================================
// Resource Commands
// =============================================================================

#[derive(clap::Subcommand, Debug)]
enum ResourceCommands {
    /// Upload a JSON resource file
    Upload {
        /// Path to the JSON payload
        file: PathBuf,

        /// Resource id; generated when omitted
        #[arg(long)]
        id: Option<Uuid>,

        /// Ship the payload in the packed wire format
        #[arg(long)]
        packed: bool,
    },
    /// Fetch a resource by id and print its JSON payload
    Fetch {
        /// Resource id
        id: Uuid,

        /// Request the payload in the packed wire format
        #[arg(long)]
        packed: bool,

        /// Seconds to wait for the reply
        #[arg(long, default_value = "5")]
        timeout_secs: u64,
    },
}

// =============================================================================
// Worker Commands
// =============================================================================

#[derive(clap::Subcommand, Debug)]
enum WorkerCommands {
    /// Pledge as a worker and print assignments as they arrive
    Pledge {
        /// Worker id; generated when omitted
        #[arg(long)]
        id: Option<Uuid>,

        /// Throughput curve, comma-separated (e.g. "100,150,200")
        #[arg(long, default_value = "100")]
        throughputs: String,
    },
}

// =============================================================================
// Helper Functions
// =============================================================================

fn parse_throughputs(curve: &str) -> Vec<u32> {
    curve
        .split(',')
        .filter_map(|entry| {
            let entry = entry.trim();
            match entry.parse::<u32>() {
                Ok(v) => Some(v),
                Err(_) => {
                    tracing::warn!(entry, "Ignoring invalid throughput entry");
                    None
                }
            }
        })
        .collect()
}

fn resource_format(packed: bool) -> ResourceFormat {
    if packed {
        ResourceFormat::Packed
    } else {
        ResourceFormat::Json
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

// =============================================================================
// Server Implementation
// =============================================================================

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let listen_addr: SocketAddr = format!("0.0.0.0:{}", args.port).parse()?;
    let config = ServerConfig::new(listen_addr)
        .with_enforce_interval(Duration::from_secs(args.enforce_interval_secs))
        .with_stale_worker_timeout(Duration::from_secs(args.stale_worker_timeout_secs));

    tracing::info!(
        listen_addr = %config.listen_addr,
        enforce_interval_secs = args.enforce_interval_secs,
        "Starting terrarium server"
    );

    // The in-process store; a relational gateway plugs in behind the same
    // trait without touching the router or the enforcer.
    let persistence = Arc::new(MemoryPersistence::new());
    let registry = ConnectionRegistry::new();
    let ctx = Arc::new(ServerContext::new(registry.clone(), persistence.clone()));

    let shutdown = install_shutdown_handler();

    let enforcer = WorkloadEnforcer::new(persistence, registry, config.stale_worker_timeout);
    let enforce_interval = config.enforce_interval;
    let enforcer_shutdown = shutdown.clone();
    tokio::spawn(async move {
        enforcer.run(enforce_interval, enforcer_shutdown).await;
    });

    let server = SocketServer::new(config.listen_addr, ctx);
    server.run(shutdown).await?;
    Ok(())
}

// =============================================================================
// Client Command Handlers
// =============================================================================

async fn handle_job_command(
    client: ClientArgs,
    command: JobCommands,
) -> Result<(), Box<dyn std::error::Error>> {
    let (kind, common) = match command {
        JobCommands::CreateWorld { common } => (JobKind::CreateWorld, common),
        JobCommands::RunSimulation { end_tick, common } => {
            (JobKind::RunSimulation { end_tick }, common)
        }
    };

    let submission = JobSubmission {
        job_id: Uuid::new_v4(),
        kind,
        priority: common.priority,
        dependencies: common.dependencies,
        input_resources: common.input_resources,
        output_resources: common.output_resources,
    };
    let job_id = submission.job_id;

    let mut conn = ServerClient::connect(&client.addr).await?;
    conn.submit_job(submission).await?;
    conn.close().await?;

    println!("Job submitted");
    println!("Job ID: {}", job_id);
    Ok(())
}

async fn handle_resource_command(
    client: ClientArgs,
    command: ResourceCommands,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        ResourceCommands::Upload { file, id, packed } => {
            let json_data = tokio::fs::read_to_string(&file).await?;
            let resource_id = id.unwrap_or_else(Uuid::new_v4);

            let mut conn = ServerClient::connect(&client.addr).await?;
            conn.upload_resource(resource_id, &json_data, resource_format(packed))
                .await?;
            conn.close().await?;

            println!("Resource uploaded");
            println!("Resource ID: {}", resource_id);
        }
        ResourceCommands::Fetch {
            id,
            packed,
            timeout_secs,
        } => {
            let mut conn = ServerClient::connect(&client.addr).await?;
            let payload = conn
                .fetch_resource(
                    id,
                    resource_format(packed),
                    Duration::from_secs(timeout_secs),
                )
                .await?;
            conn.close().await?;

            match payload {
                Some(json) => println!("{}", json),
                None => {
                    eprintln!("Resource {} not available", id);
                    std::process::exit(1);
                }
            }
        }
    }
    Ok(())
}

async fn handle_worker_command(
    client: ClientArgs,
    command: WorkerCommands,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        WorkerCommands::Pledge { id, throughputs } => {
            let worker_id = id.unwrap_or_else(Uuid::new_v4);
            let curve = parse_throughputs(&throughputs);
            if curve.is_empty() {
                return Err("throughput curve must contain at least one entry".into());
            }

            let mut conn = ServerClient::connect(&client.addr).await?;
            conn.pledge(worker_id, curve, CODE_VERSION).await?;
            println!("Pledged as worker {}", worker_id);
            println!("Waiting for assignments (ctrl-c to stop)...");

            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    received = conn.recv() => {
                        match received? {
                            Some(Message::AssignJob { job }) => {
                                println!("Assigned job {} (priority {})", job.id, job.priority);
                            }
                            Some(other) => {
                                tracing::debug!(?other, "Ignoring message");
                            }
                            None => {
                                eprintln!("Server closed the connection");
                                break;
                            }
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Server(server_args) => run_server(server_args).await?,
        Commands::Job { client, command } => handle_job_command(client, command).await?,
        Commands::Resource { client, command } => handle_resource_command(client, command).await?,
        Commands::Worker { client, command } => handle_worker_command(client, command).await?,
    }

    Ok(())
}
