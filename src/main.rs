use std::process::ExitCode;
use std::sync::Arc;

use clap::error::ErrorKind;
use clap::Parser;
use simplelog::{ColorChoice, ConfigBuilder, LevelFilter, TermLogger, TerminalMode};

use roost::backend::Backend;
use roost::console::{self, Args, ConsoleFrontend, EARLY_EXIT_STATUS};
use roost::host::Host;
use roost::lv2::Lv2World;
use roost::mapper::Mapper;
use roost::urids::Urids;

fn parse_args() -> Result<Args, i32> {
    Args::try_parse().map_err(|err| {
        let _ = err.print();
        match err.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => EARLY_EXIT_STATUS,
            _ => 1,
        }
    })
}

fn init_logging(trace: bool) {
    let level = if trace {
        LevelFilter::Trace
    } else {
        LevelFilter::Info
    };
    let config = ConfigBuilder::new()
        .set_time_level(LevelFilter::Off)
        .set_target_level(LevelFilter::Off)
        .set_thread_level(LevelFilter::Off)
        .build();
    let _ = TermLogger::init(level, config, TerminalMode::Stderr, ColorChoice::Auto);
}

#[cfg(feature = "jack")]
fn make_backend(urids: &Urids) -> Box<dyn Backend> {
    Box::new(roost::backend::jack::JackBackend::new(*urids))
}

#[cfg(not(feature = "jack"))]
fn make_backend(_urids: &Urids) -> Box<dyn Backend> {
    log::warn!("Built without JACK support, using the dummy backend");
    Box::new(roost::backend::dummy::DummyBackend::new())
}

fn run(args: Args) -> Result<(), i32> {
    let mapper = Arc::new(Mapper::new());
    let urids = Urids::new(&mapper);

    // Load the world and resolve the plugin (possibly through a state)
    let (world, initial_state) = Lv2World::open(&args.plugin, mapper.clone()).map_err(|err| {
        log::error!("{err}");
        2
    })?;

    let backend = make_backend(&urids);

    if args.ui_uri.is_some() || args.show_ui {
        log::warn!("Embedded plugin UIs are not supported; using the console");
    }

    let mut host = Host::with_mapper(Box::new(world), backend, args.to_options(), mapper);

    // SIGINT and SIGTERM raise the exit flag, polled by the update loop
    let done = host.done();
    #[cfg(unix)]
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        let _ = signal_hook::flag::register(signal, done.inner());
    }

    host.open(initial_state).map_err(|err| {
        log::error!("{err}");
        3
    })?;
    host.activate().map_err(|err| {
        log::error!("{err}");
        4
    })?;

    let mut frontend = ConsoleFrontend::new(*host.urids(), args.print_controls);
    host.init_ui(&mut frontend);
    console::run(&mut host, &mut frontend);

    host.deactivate();
    host.close();
    Ok(())
}

fn main() -> ExitCode {
    let args = match parse_args() {
        Ok(args) => args,
        // The sentinel marks a successful early exit and must not leak
        Err(code) if code == EARLY_EXIT_STATUS => return ExitCode::SUCCESS,
        Err(code) => return ExitCode::from(code as u8),
    };

    init_logging(args.trace);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code as u8),
    }
}
