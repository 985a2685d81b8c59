//! The console frontend: command-line options, the interactive command
//! prompt, and plain-text control reporting.

use std::io::Write;
use std::time::Duration;

use clap::Parser;

use crate::any_value::AnyValue;
use crate::controls::{Control, ControlTarget};
use crate::host::{Frontend, Host, Options};
use crate::urids::Urids;

/// Arbitrary return code for successful early exit (for --help and so on).
/// Never handed to the OS as-is.
pub const EARLY_EXIT_STATUS: i32 = -431;

/// Run an LV2 plugin as an audio application.
#[derive(Debug, Parser)]
#[command(name = "roost", version, about)]
pub struct Args {
    /// Buffer size for plugin <=> UI communication, in bytes
    #[arg(short = 'b', value_name = "SIZE", value_parser = clap::value_parser!(u32).range(2..=2_147_483_648))]
    pub buffer_size: Option<u32>,

    /// Set control value (like "vol=1.4")
    #[arg(short = 'c', value_name = "SYM=VAL")]
    pub controls: Vec<String>,

    /// Dump plugin <=> UI communication
    #[arg(short = 'd')]
    pub dump: bool,

    /// Ignore keyboard input, run non-interactively
    #[arg(short = 'i')]
    pub non_interactive: bool,

    /// Audio client name
    #[arg(short = 'n', value_name = "NAME")]
    pub name: Option<String>,

    /// Print control output changes to stdout
    #[arg(short = 'p')]
    pub print_controls: bool,

    /// Show plugin UI if possible
    #[arg(short = 's')]
    pub show_ui: bool,

    /// Print debug trace messages
    #[arg(short = 't')]
    pub trace: bool,

    /// Load the UI with the given URI
    #[arg(short = 'U', value_name = "URI")]
    pub ui_uri: Option<String>,

    /// Exit if the requested client name is taken
    #[arg(short = 'x')]
    pub exact_name: bool,

    /// Show controls for ports marked not-on-GUI
    #[arg(long = "show-hidden")]
    pub show_hidden: bool,

    /// Plugin URI, preset URI, or path to a saved state
    #[arg(value_name = "PLUGIN_URI")]
    pub plugin: String,
}

impl Args {
    pub fn to_options(&self) -> Options {
        Options {
            name: self.name.clone(),
            name_exact: self.exact_name,
            ring_size: self.buffer_size.unwrap_or(0),
            update_rate: 0.0,
            scale_factor: 0.0,
            dump: self.dump,
            show_hidden: self.show_hidden,
            show_ui: self.show_ui,
            print_controls: self.print_controls,
            non_interactive: self.non_interactive,
            ui_uri: self.ui_uri.clone(),
            controls: self.controls.clone(),
        }
    }
}

/// Console implementation of the frontend callback contract.
pub struct ConsoleFrontend {
    urids: Urids,
    print_controls: bool,
}

impl ConsoleFrontend {
    pub fn new(urids: Urids, print_controls: bool) -> Self {
        Self {
            urids,
            print_controls,
        }
    }
}

impl Frontend for ConsoleFrontend {
    fn control_changed(&mut self, control: &Control, value: &AnyValue) {
        if self.print_controls && control.value_type == self.urids.atom_float {
            println!("{} = {}", control.symbol, value.number(&self.urids));
        }
    }
}

fn print_control(host: &Host, control: &Control) {
    if let ControlTarget::Port(index) = control.target {
        println!("{} = {}", control.symbol, host.control_value(index));
    }
}

fn print_controls(host: &Host, writable: bool, readable: bool) {
    for control in host.controls().iter() {
        if matches!(control.target, ControlTarget::Port(_))
            && ((control.is_writable && writable) || (control.is_readable && readable))
        {
            print_control(host, control);
        }
    }
    let _ = std::io::stdout().flush();
}

fn print_help() {
    eprintln!(
        "Commands:\n\
         \x20 help              Display this help message\n\
         \x20 controls          Print settable control values\n\
         \x20 monitors          Print output control values\n\
         \x20 presets           Print available presets\n\
         \x20 preset URI        Set preset\n\
         \x20 quit              Quit\n\
         \x20 set INDEX VALUE   Set control value by port index\n\
         \x20 set SYMBOL VALUE  Set control value by symbol\n\
         \x20 SYMBOL = VALUE    Set control value by symbol"
    );
}

/// Handle one line from the prompt.
fn process_command(host: &mut Host, frontend: &mut ConsoleFrontend, line: &str) {
    let line = line.trim();
    let words: Vec<&str> = line.split_whitespace().collect();

    match words.as_slice() {
        [] => {}
        ["help"] => print_help(),
        ["quit"] | ["q"] => host.request_exit(),
        ["controls"] => print_controls(host, true, false),
        ["monitors"] => print_controls(host, false, true),
        ["presets"] => {
            for preset in host.load_presets().to_vec() {
                println!("{} ({})", preset.uri, preset.label);
            }
        }
        ["preset", uri] => {
            let uri = uri.to_string();
            match host.apply_preset(&uri, Some(frontend as &mut dyn Frontend)) {
                Ok(()) => print_controls(host, true, false),
                Err(err) => eprintln!("error: {err}"),
            }
        }
        ["set", index, value] if index.parse::<u32>().is_ok() => {
            let index: u32 = index.parse().unwrap();
            match value.parse::<f32>() {
                Ok(value) if (index as usize) < host.port_map().len() => {
                    host.write_control_change(index, value);
                    if let Some(symbol) = host.port_map().symbol(index) {
                        println!("{symbol} = {value}");
                    }
                }
                Ok(_) => eprintln!("error: port index out of range"),
                Err(_) => eprintln!("error: invalid value (try `help')"),
            }
        }
        ["set", symbol, value] => set_by_symbol(host, symbol, value),
        [symbol, "=", value] => set_by_symbol(host, symbol, value),
        _ => eprintln!("error: invalid command (try `help')"),
    }
}

fn set_by_symbol(host: &mut Host, symbol: &str, value: &str) {
    let Ok(value) = value.parse::<f32>() else {
        eprintln!("error: invalid value (try `help')");
        return;
    };
    match host.port_map().by_symbol(symbol) {
        Some((index, _, _)) => {
            host.set_port_value_direct(index, value);
            println!("{symbol} = {value}");
        }
        None => eprintln!("error: no control named `{symbol}'"),
    }
}

/// Open and run the console interface until the exit flag is raised.
pub fn run(host: &mut Host, frontend: &mut ConsoleFrontend) {
    // Print initial control values
    for control in host.controls().iter() {
        if control.is_writable && matches!(control.target, ControlTarget::Port(_)) {
            print_control(host, control);
        }
    }

    let period = Duration::from_secs_f32(1.0 / host.settings().ui_update_hz.max(1.0));

    if host.options().non_interactive {
        while host.update(frontend) {
            std::thread::sleep(period);
        }
        return;
    }

    // Primitive command prompt for setting control values
    let stdin = std::io::stdin();
    let mut line = String::new();
    while !host.done().raised() {
        if !host.update(frontend) {
            break;
        }

        print!("> ");
        let _ = std::io::stdout().flush();

        line.clear();
        match stdin.read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => process_command(host, frontend, &line),
        }
    }

    host.request_exit();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyBackend;
    use crate::testing::{rich_plugin, MockWorld};

    fn test_host() -> Host {
        let world = MockWorld::new(rich_plugin());
        let mut host = Host::new(
            Box::new(world),
            Box::new(DummyBackend::new()),
            Options::default(),
        );
        host.open(None).unwrap();
        host
    }

    #[test]
    fn symbol_assignment_sets_the_buffer_directly() {
        let mut host = test_host();
        let mut frontend = ConsoleFrontend::new(*host.urids(), false);

        process_command(&mut host, &mut frontend, "gain = 0.25\n");
        assert_eq!(host.control_value(3), 0.25);

        process_command(&mut host, &mut frontend, "set level 0.5");
        assert_eq!(host.control_value(5), 0.5);
        host.close();
    }

    #[test]
    fn quit_raises_the_exit_flag() {
        let mut host = test_host();
        let mut frontend = ConsoleFrontend::new(*host.urids(), false);

        assert!(!host.done().raised());
        process_command(&mut host, &mut frontend, "quit");
        assert!(host.done().raised());
        host.close();
    }

    #[test]
    fn args_map_to_host_options() {
        let args = Args::parse_from([
            "roost",
            "-b",
            "8192",
            "-c",
            "gain=0.5",
            "-d",
            "-i",
            "-n",
            "myhost",
            "-p",
            "-x",
            "http://example.org/plug",
        ]);
        let opts = args.to_options();
        assert_eq!(opts.ring_size, 8192);
        assert_eq!(opts.controls, vec![String::from("gain=0.5")]);
        assert!(opts.dump && opts.non_interactive && opts.print_controls && opts.name_exact);
        assert_eq!(opts.name.as_deref(), Some("myhost"));
        assert_eq!(args.plugin, "http://example.org/plug");
    }
}
