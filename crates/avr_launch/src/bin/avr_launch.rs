//! AVR launcher CLI
//!
//! Usage:
//!   avr_launch run -m                   # minimal flight set
//!   avr_launch run -m thermal status    # minimal set plus thermal and status
//!   avr_launch pull -n                  # pull the normal set
//!   avr_launch build -l apriltag        # build a module locally
//!   avr_launch run --dry-run -a         # show the plan without running it
//!   avr_launch stop                     # bring everything down

use avr_launch::runtime::{launch, supervise, ContainerRuntime, DockerCompose, SessionConfig};
use avr_launch::{
    preflight, privilege, Action, ComposeOptions, LaunchArgs, LaunchPlan, LauncherConfig,
};
use std::sync::Arc;
use tokio::sync::watch;

#[tokio::main]
async fn main() {
    let args: LaunchArgs = argh::from_env();

    let env = env_logger::Env::default().default_filter_or(args.log_filter());
    env_logger::init_from_env(env);

    if !args.dry_run && !args.no_sudo && !privilege::is_root() {
        match privilege::reexec_with_sudo().await {
            Ok(code) => std::process::exit(code),
            Err(e) => {
                log::error!("Failed to re-launch through sudo: {}", e);
                std::process::exit(1);
            }
        }
    }

    let config = match LauncherConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            log::error!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    let code = match args.action {
        Action::Stop => stop(&args, &config).await,
        Action::Run | Action::Build | Action::Pull => act(&args, &config).await,
    };

    std::process::exit(code);
}

/// Bring the whole project down
async fn stop(args: &LaunchArgs, config: &LauncherConfig) -> i32 {
    if !args.tokens().is_empty() {
        log::warn!("'stop' always stops every service; ignoring module arguments");
    }
    if !config.compose_file.is_file() {
        log::info!(
            "No compose file at {}, nothing to stop",
            config.compose_file.display()
        );
        return 0;
    }
    if args.dry_run {
        println!(
            "Would run: down --remove-orphans --volumes for project '{}'",
            config.project_name
        );
        return 0;
    }

    let runtime = DockerCompose::detect(&config.project_name, &config.compose_file).await;
    match runtime.down().await {
        Ok(()) => 0,
        Err(e) => {
            log::error!("Failed to stop services: {}", e);
            1
        }
    }
}

/// Resolve the selection and run, build or pull it
async fn act(args: &LaunchArgs, config: &LauncherConfig) -> i32 {
    let registry = match config.registry() {
        Ok(registry) => registry,
        Err(e) => {
            log::error!("Invalid config: {}", e);
            return 1;
        }
    };

    let selection = match registry.resolve(&args.tokens()) {
        Ok(selection) => selection,
        Err(e) => {
            log::error!("{}", e);
            return 1;
        }
    };
    log::info!("Selected modules: {}", selection);

    let options = ComposeOptions::detect(args.local, args.headless);
    let plan = match LaunchPlan::build(&registry, selection, config, &options) {
        Ok(plan) => plan,
        Err(e) => {
            log::error!("Failed to build launch plan: {}", e);
            return 1;
        }
    };

    for warning in preflight::check(&plan.selection, config, args.action) {
        log::warn!("{}", warning);
    }

    if args.dry_run {
        println!("{}", plan);
        match plan.compose.to_yaml() {
            Ok(yaml) => {
                println!("Compose file ({}):", config.compose_file.display());
                println!("{}", yaml);
                return 0;
            }
            Err(e) => {
                log::error!("{}", e);
                return 1;
            }
        }
    }

    if let Err(e) = plan.write_compose(&config.compose_file) {
        log::error!("{}", e);
        return 1;
    }

    let runtime = Arc::new(DockerCompose::detect(&config.project_name, &config.compose_file).await);

    let result = match args.action {
        Action::Build => runtime.build(plan.services()).await,
        Action::Pull => runtime.pull(plan.services()).await,
        Action::Run => return run(runtime, plan, config).await,
        Action::Stop => return stop(args, config).await,
    };

    match result {
        Ok(()) => 0,
        Err(e) => {
            log::error!("{} failed: {}", args.action, e);
            1
        }
    }
}

/// Launch the plan and supervise it until Ctrl+C
async fn run(runtime: Arc<DockerCompose>, plan: LaunchPlan, config: &LauncherConfig) -> i32 {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(());

    if let Err(e) = ctrlc::set_handler(move || {
        log::info!("Received Ctrl+C, initiating shutdown...");
        let _ = shutdown_tx.send(());
    }) {
        log::error!("Error setting Ctrl+C handler: {}", e);
        return 1;
    }

    let session_config = SessionConfig {
        stop_timeout: config.stop_timeout(),
        health_interval: config.health_interval(),
        ..Default::default()
    };

    let mut session = match launch(runtime, plan.order, session_config, &shutdown_rx).await {
        Ok(session) => session,
        Err(e) => {
            for error in e.rollback_errors() {
                log::warn!("Rollback: {}", error);
            }
            if e.is_interrupt() {
                log::info!("Launch cancelled, started services were stopped");
                return 0;
            }
            log::error!("Launch failed: {}", e);
            return 1;
        }
    };

    let outcome = supervise(&mut session, &mut shutdown_rx).await;
    log::info!("AVR launcher exiting");
    outcome.exit_code()
}
