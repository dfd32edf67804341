use std::net::IpAddr;
use std::process;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use rspd_core::platform::simulated::SimulatedTarget;
use rspd_core::types::ProcessId;
use rspd_core::{create_target, Target};
use rspd_protocol::config::{DEFAULT_CACHE_LINE_SIZE, DEFAULT_MAX_PACKET_SIZE, DEFAULT_PORT};
use rspd_protocol::packet::frame;
use rspd_protocol::{Server, ServerConfig};
use rspd_utils::{info, init_logging_with_level, LogFormat, LogLevel};

/// A GDB remote serial protocol stub.
#[derive(Parser, Debug)]
#[command(name = "rspd")]
#[command(version)]
#[command(about = "Let GDB drive a process over the remote serial protocol", long_about = None)]
struct Cli
{
    /// Default log level; RUST_LOG directives take precedence
    #[arg(long, global = true, env = "RSPD_LOG_LEVEL")]
    log_level: Option<LogLevel>,

    /// Log format: pretty or json
    #[arg(long, global = true, default_value = "pretty", env = "RSPD_LOG_FORMAT")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands
{
    /// Listen for GDB and serve debugging sessions
    Serve(ServeArgs),
    /// Print a payload framed as a packet (`$payload#cc`)
    Frame
    {
        /// Packet payload
        payload: String,
    },
}

#[derive(Args, Debug)]
struct ServeArgs
{
    /// Interface to listen on
    #[arg(long, default_value = "127.0.0.1", env = "RSPD_BIND")]
    bind: IpAddr,

    /// TCP port (0 picks a free one)
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "RSPD_PORT")]
    port: u16,

    /// Process to attach to when a client connects
    #[arg(long, env = "RSPD_PID")]
    pid: Option<u32>,

    /// Serve the built-in simulated process (pid 100) instead of a real one
    #[arg(long, default_value_t = false)]
    simulate: bool,

    /// Largest packet payload accepted or sent
    #[arg(long, default_value_t = DEFAULT_MAX_PACKET_SIZE, env = "RSPD_MAX_PACKET_SIZE")]
    max_packet_size: usize,

    /// Largest memory read kept in the cache
    #[arg(long, default_value_t = DEFAULT_CACHE_LINE_SIZE, env = "RSPD_CACHE_LINE_SIZE")]
    cache_line_size: usize,

    /// Breakpoint table capacity
    #[arg(long, default_value_t = 64, env = "RSPD_BREAKPOINTS")]
    breakpoints: usize,

    /// Watchpoint table capacity
    #[arg(long, default_value_t = 4, env = "RSPD_WATCHPOINTS")]
    watchpoints: usize,

    /// Milliseconds to wait for a stop after an interrupt
    #[arg(long, default_value_t = 2000, env = "RSPD_INTERRUPT_TIMEOUT_MS")]
    interrupt_timeout_ms: u64,

    /// Exit after the first session instead of accepting the next client
    #[arg(long, default_value_t = false)]
    once: bool,
}

impl ServeArgs
{
    fn config(&self) -> ServerConfig
    {
        ServerConfig {
            bind: self.bind,
            port: self.port,
            max_packet_size: self.max_packet_size,
            cache_line_size: self.cache_line_size,
            breakpoint_capacity: self.breakpoints,
            watchpoint_capacity: self.watchpoints,
            interrupt_timeout: Duration::from_millis(self.interrupt_timeout_ms),
            attach_pid: self.pid.map(ProcessId::from),
        }
    }
}

fn main()
{
    let cli = Cli::parse();

    let logging = init_logging_with_level(cli.log_level.unwrap_or(LogLevel::Info), cli.log_format);
    // Held until exit so buffered file output is flushed.
    let guard = match logging {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            process::exit(1);
        }
    };

    let outcome = match cli.command {
        Commands::Frame { payload } => {
            println!("{}", frame(&payload));
            Ok(())
        }
        Commands::Serve(args) => run_serve(&args),
    };

    if let Err(e) = outcome {
        eprintln!("Error: {e}");
        drop(guard);
        process::exit(1);
    }
}

fn run_serve(args: &ServeArgs) -> Result<(), Box<dyn std::error::Error>>
{
    let mut target: Box<dyn Target> = if args.simulate {
        info!("serving the simulated process (pid 100)");
        Box::new(SimulatedTarget::demo())
    } else {
        create_target()?
    };

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let server = Server::bind(args.config()).await?;
        info!(address = %server.local_addr()?, "rspd ready");
        if args.once {
            let stats = server.serve_one(&mut *target).await?;
            info!(?stats, "session finished");
            Ok(())
        } else {
            server.serve(&mut *target).await
        }
    })?;
    Ok(())
}
