use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};

use capdispatch::caps;
use capdispatch::config::{self, Config};
use capdispatch::kernel::verify::{self, CheckStatus};
use capdispatch::kernel::{self, DeterminismClass, KernelRequirements, OpId};
use capdispatch::Runtime;

#[derive(Parser)]
#[command(
    name = "capdispatch",
    about = "Deterministic capability negotiation and compute-kernel dispatch",
    version,
    long_about = None
)]
struct Cli {
    /// Configuration file (overrides CAPDISPATCH_CONFIG and ./capdispatch.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the probed host capabilities
    Probe {
        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// List the registered backends in selection order
    Backends,

    /// Select one backend per subsystem and print the audit log
    Select {
        /// Require D0 backends on lockstep-relevant subsystems
        #[arg(long)]
        lockstep: bool,

        /// Force a backend, e.g. `graphics=soft` (repeatable)
        #[arg(long = "override", value_name = "SUBSYSTEM=BACKEND", value_parser = parse_override)]
        overrides: Vec<(String, String)>,

        /// Also write the selection as a DTLV container
        #[arg(long, value_name = "PATH")]
        tlv: Option<PathBuf>,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Show which tier every builtin operation resolves to on this host
    Kernels {
        /// Determinism class to resolve under (strict or derived)
        #[arg(long)]
        class: Option<DeterminismClass>,
    },

    /// Check every kernel tier against the scalar reference
    Verify {
        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },
}

fn parse_override(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((sub, backend)) if !sub.is_empty() && !backend.is_empty() => {
            Ok((sub.trim().to_string(), backend.trim().to_string()))
        }
        _ => Err(format!("expected SUBSYSTEM=BACKEND, got {s:?}")),
    }
}

fn init_tracing(logging: &config::LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut cfg = Config::resolve(cli.config.as_deref())?;
    init_tracing(&cfg.logging);

    match cli.command {
        Commands::Probe { json } => {
            let hw = cfg.hardware.apply(caps::probe())?;
            if json {
                println!("{}", serde_json::to_string_pretty(&hw)?);
            } else {
                println!("os flags   : {:#010x}", hw.os_flags);
                println!("cpu flags  : {:#010x}", hw.cpu_flags);
                println!("gpu flags  : {:#010x}", hw.gpu_flags);
                println!("isa width  : {} bits", hw.isa_width_bits());
                println!("simd       : {}", if hw.has_simd() { "yes" } else { "no" });
                println!("kernel caps: {:#x}", hw.kernel_capabilities());
            }
        }
        Commands::Backends => {
            let rt = Runtime::from_config(&cfg)?;
            println!(
                "{:<4} | {:<10} | {:<8} | {:>5} | {:<5} | {:<8} | Capable",
                "Sub", "Subsystem", "Backend", "Prio", "Grade", "Perf"
            );
            println!("{:-<4}-|-{:-<10}-|-{:-<8}-|-{:->5}-|-{:-<5}-|-{:-<8}-|-{:-<7}", "", "", "", "", "", "", "");
            for desc in rt.backends.backends() {
                println!(
                    "{:<4} | {:<10} | {:<8} | {:>5} | {:<5} | {:<8} | {}",
                    desc.subsystem_id,
                    desc.subsystem_name.as_deref().unwrap_or("-"),
                    desc.backend_name,
                    desc.priority,
                    desc.determinism_grade,
                    desc.perf_class,
                    if desc.is_hardware_capable(&rt.hw) { "yes" } else { "no" }
                );
            }
        }
        Commands::Select {
            lockstep,
            overrides,
            tlv,
            json,
        } => {
            cfg.selection.lockstep_strict |= lockstep;
            cfg.selection.overrides.extend(overrides);

            let rt = Runtime::from_config(&cfg)?;
            let profile = cfg.selection.profile(&rt.backends)?;
            let sel = rt.backends.select(&profile, &rt.hw);

            if let Some(path) = &tlv {
                caps::write_capabilities_tlv(&sel, &rt.hw, path)?;
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&sel)?);
            } else {
                print!("{}", caps::audit_log(&sel, &rt.hw));
            }
            if let Some(err) = &sel.error {
                bail!("backend selection failed (code {}): {err}", err.code());
            }
        }
        Commands::Kernels { class } => {
            let rt = Runtime::from_config(&cfg)?;
            let class = class.unwrap_or(cfg.kernels.class);
            let req = KernelRequirements::from_hw(&rt.hw);
            println!("class: {class}, backend mask: {:#05b}", rt.kernels.backend_mask());
            println!("{:<22} | {:<8} | Deterministic", "Operation", "Tier");
            println!("{:-<22}-|-{:-<8}-|-{:-<13}", "", "", "");
            for op in OpId::BUILTIN {
                match kernel::resolve(&rt.kernels, op, &req, class) {
                    Some(entry) => println!(
                        "{:<22} | {:<8} | {}",
                        op.name(),
                        entry.tier,
                        if entry.meta.deterministic { "yes" } else { "no" }
                    ),
                    None => println!("{:<22} | {:<8} | -", op.name(), "none"),
                }
            }
        }
        Commands::Verify { json } => {
            let rt = Runtime::from_config(&cfg)?;
            let report = verify::verify_registry(&rt.kernels);
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{:<22} | {:<6} | {:<7} | Details", "Operation", "Tier", "Status");
                println!("{:-<22}-|-{:-<6}-|-{:-<7}-|-{:-<30}", "", "", "", "");
                for check in &report.checks {
                    let status = match check.status {
                        CheckStatus::Pass => "PASS",
                        CheckStatus::Fail => "FAIL",
                        CheckStatus::Skipped => "SKIP",
                    };
                    println!("{:<22} | {:<6} | {:<7} | {}", check.op, check.tier, status, check.details);
                }
            }
            if !report.passed() {
                let failed = report.count(CheckStatus::Fail);
                bail!("kernel verification failed: {failed} tier(s) disagree with scalar");
            }
        }
    }

    Ok(())
}
