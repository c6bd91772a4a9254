use clap::{Parser, Subcommand};
use hostbind::gc_gate::GC_GLOBAL;
use hostbind::{BindingError, JsValue, Realm, RealmOptions};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "hostbind", version, about = "Inspect a host-bound JavaScript realm")]
struct Cli {
    /// Install the `gc` global trigger
    #[arg(long, env = "HOSTBIND_EXPOSE_GC")]
    expose_gc: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print `typeof NAME` as seen by script code
    Typeof { name: String },
    /// Report whether NAME is bound on the global object
    Has { name: String },
    /// List the enumerable globals
    Globals,
    /// List registered native classes with their superclass
    Classes,
    /// Allocate throwaway blobs, then collect and report the heap
    Collect {
        #[arg(long, default_value_t = 64)]
        blocks: usize,
    },
}

fn collect(realm: &mut Realm, blocks: usize) -> Result<(), BindingError> {
    let before = realm.heap_stats();
    let blob = realm.resolve_identifier("Blob")?;
    for _ in 0..blocks {
        let part = JsValue::from("x".repeat(1024));
        let parts = realm.create_array(vec![part]);
        realm.construct(&blob, &[parts])?;
    }
    let peak = realm.heap_stats();
    if realm.options().expose_gc {
        let trigger = realm.resolve_identifier(GC_GLOBAL)?;
        realm.call(&trigger, &JsValue::Undefined, &[])?;
    } else {
        realm.collect_garbage();
    }
    let after = realm.heap_stats();
    println!("objects: {} -> {} -> {}", before.live_objects, peak.live_objects, after.live_objects);
    println!("heap_used: {} -> {} -> {}", before.heap_used, peak.heap_used, after.heap_used);
    Ok(())
}

fn run(cli: Cli) -> Result<(), BindingError> {
    let options = RealmOptions::new().expose_gc(cli.expose_gc);
    let mut realm = Realm::new(options).map_err(|e| BindingError::InvalidConstruction(e.to_string()))?;
    match cli.command {
        Command::Typeof { name } => println!("{}", realm.type_of_identifier(&name)?),
        Command::Has { name } => println!("{}", realm.globals().contains(&name)),
        Command::Globals => {
            for key in realm.globals().enumerable_keys() {
                println!("{key}");
            }
        }
        Command::Classes => {
            let registry = realm.registry();
            for (_, desc) in registry.iter() {
                match desc.superclass() {
                    Some(parent) => println!("{} extends {}", desc.name(), registry.get(parent).name()),
                    None => println!("{}", desc.name()),
                }
            }
        }
        Command::Collect { blocks } => collect(&mut realm, blocks)?,
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Uncaught {}: {}", e.name(), e.message());
            ExitCode::from(1)
        }
    }
}
