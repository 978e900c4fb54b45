use anyhow::{Result, anyhow, bail};
use log::info;
use pico_args::Arguments;
use serde_json::json;
use std::{
    env,
    path::PathBuf,
    process::Command,
    sync::atomic::Ordering,
    thread,
    time::Duration,
};

use posectl::engine::{EngineStatus, PoseEngine};
use posectl::ipc::{self, DaemonOptions};
use posectl::pipeline::{self, CycleOutput, UiEvent};
use posectl::source::{JsonLinesSource, PoseSource, frame_source};

pub fn run() -> Result<()> {
    let mut pargs = Arguments::from_env();

    // Hidden daemon mode (spawned by `start`)
    if pargs.contains("--daemon") {
        return ipc::run_daemon(daemon_options(&mut pargs)?);
    }

    // No args -> general help
    if env::args().len() == 1 {
        print_help();
        return Ok(());
    }

    if pargs.contains("-h") || pargs.contains("--help") {
        print_help();
        return Ok(());
    }

    // First free arg is the subcommand
    let subcmd: Option<String> = pargs.free_from_str().ok();

    match subcmd.as_deref() {
        Some("help") => {
            let topic: Option<String> = pargs.free_from_str().ok();
            if let Some(t) = topic {
                print_subcmd_help(&t);
            } else {
                print_help();
            }
            Ok(())
        }

        Some("start") => {
            let opts = daemon_options(&mut pargs)?;
            let exe = env::current_exe()?;
            let mut cmd = Command::new(exe);
            cmd.arg("--daemon");
            if let Some(p) = &opts.profile {
                cmd.arg("--profile").arg(p);
            }
            if let Some(r) = &opts.replay {
                cmd.arg("--replay").arg(r);
            }
            let child = cmd.spawn()?;
            println!("posectl: started daemon (pid={})", child.id());
            Ok(())
        }

        Some("run") => run_foreground(daemon_options(&mut pargs)?),

        Some("replay") => {
            let profile: Option<String> = pargs.opt_value_from_str("--profile")?;
            let path: PathBuf = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: posectl replay <frames.jsonl> [--profile NAME]"))?;
            replay_file(path, profile.as_deref())
        }

        Some("stop") => request(json!({"op": "shutdown"})),
        Some("status") => request(json!({"op": "status"})),
        Some("poses") => request(json!({"op": "poses"})),
        Some("gestures") => request(json!({"op": "gestures"})),
        Some("frame") => request(json!({"op": "frame"})),
        Some("swipe") => request(json!({"op": "swipe"})),
        Some("confirm") => request(json!({"op": "confirm"})),
        Some("events") => request(json!({"op": "events"})),
        Some("lobby-reset") => request(json!({"op": "lobby-reset"})),
        Some("reload") => request(json!({"op": "reload"})),
        Some("list") => request(json!({"op": "list"})),

        Some("use") => {
            let name: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: posectl use <profile_name>"))?;
            request(json!({"op": "use", "profile": name}))
        }

        Some(other) => {
            eprintln!("unknown subcommand: {other}\n");
            print_help();
            Ok(())
        }

        None => {
            print_help();
            Ok(())
        }
    }
}

fn daemon_options(pargs: &mut Arguments) -> Result<DaemonOptions> {
    Ok(DaemonOptions {
        profile: pargs.opt_value_from_str("--profile")?,
        replay: pargs.opt_value_from_str("--replay")?,
    })
}

fn request(req: serde_json::Value) -> Result<()> {
    let r = ipc::client_request(req)?;
    print_response(&r);
    Ok(())
}

/// Engine in this process; UI events go to stdout as JSON lines.
fn run_foreground(opts: DaemonOptions) -> Result<()> {
    let cfg = ipc::load_config(opts.profile.as_deref())?;
    info!("active profile '{}'", cfg.active_name);
    let source = frame_source(opts.replay, cfg.profile.source.frame_interval_ms);
    let engine = PoseEngine::new(cfg.profile, source);
    engine.start()?;
    let shutdown = ipc::shutdown_flag()?;

    while !shutdown.load(Ordering::SeqCst) {
        print_events(&engine.poll_events());
        match engine.status() {
            EngineStatus::Stopped => break,
            EngineStatus::Unavailable(reason) => {
                engine.stop();
                bail!("pose source unavailable: {reason}");
            }
            EngineStatus::Idle | EngineStatus::Running => {}
        }
        thread::sleep(Duration::from_millis(10));
    }

    engine.stop();
    print_events(&engine.poll_events());
    Ok(())
}

fn print_events(events: &[UiEvent]) {
    for ev in events {
        println!("{}", json!({"event": ipc::event_key(ev), "detail": ev}));
    }
}

fn replay_file(path: PathBuf, profile: Option<&str>) -> Result<()> {
    let cfg = ipc::load_config(profile)?;
    let mut source = JsonLinesSource::from_path(&path, cfg.profile.source.frame_interval_ms);
    source.open()?;
    let cycles = pipeline::replay(&mut source, &cfg.profile, |out| {
        println!("{}", cycle_summary(out));
    });
    source.close();
    info!("replayed {} cycles from {}", cycles?, path.display());
    Ok(())
}

fn cycle_summary(out: &CycleOutput) -> serde_json::Value {
    let people: Vec<_> = out
        .frame
        .tracks
        .iter()
        .zip(&out.frame.slots)
        .map(|(t, slot)| {
            json!({
                "id": t.id,
                "centroid": t.centroid,
                "gesture": t.gesture,
                "missing": t.missing_count,
                "slot": slot,
            })
        })
        .collect();
    json!({
        "cycle": out.frame.cycle,
        "timestamp_ms": out.frame.timestamp_ms,
        "people": people,
        "lobby": out.frame.lobby,
        "hold_progress": out.frame.hold_progress,
        "score": out.frame.score,
        "events": out.events(),
    })
}

fn print_help() {
    println!(
        r#"posectl - multi-person pose tracking and gesture triggers

USAGE:
  posectl help [command]                   Show general or command-specific help
  posectl start [--profile P] [--replay F] Start the daemon
  posectl run [--profile P] [--replay F]   Run in the foreground, printing UI events
  posectl replay <file> [--profile P]      Run a recorded frame file offline
  posectl stop                             Stop the daemon
  posectl status                           Show engine state
  posectl poses                            Smoothed keypoints per person
  posectl gestures                         Current gesture per person
  posectl frame                            Full snapshot: tracks, slots, lobby
  posectl swipe                            Take the pending swipe, if any
  posectl confirm                          Take the pending hold confirmation
  posectl events                           Drain queued UI events
  posectl lobby-reset                      Return the lobby to waiting
  posectl reload                           Reload active profile
  posectl use <name>                       Switch active profile
  posectl list                             List profiles

FRAMES:
  One JSON object per line: {{"timestamp_ms": 33, "poses": [[{{"x":..,"y":..,"visibility":..}}]], "hand_tip_x": 0.4}}
  Without --replay, frames are read from stdin.

TIPS:
  - Profiles: ~/.config/posectl/profiles
  - Active profile pointer: ~/.config/posectl/active
  - Socket: ~/.local/run/posectl.sock (override with POSECTL_SOCKET)
"#
    );
}

fn print_subcmd_help(cmd: &str) {
    match cmd {
        "start" => println!(
            "usage: posectl start [--profile NAME] [--replay FILE]\nStarts the background daemon."
        ),
        "run" => println!(
            "usage: posectl run [--profile NAME] [--replay FILE]\nRuns the engine in this process until Ctrl-C or end of input."
        ),
        "replay" => println!(
            "usage: posectl replay <file> [--profile NAME]\nPrints one JSON summary per cycle."
        ),
        "stop" => println!("usage: posectl stop\nStops the running daemon."),
        "status" => println!(
            "usage: posectl status\nShows engine state, active profile, cycle count and lobby phase."
        ),
        "swipe" | "confirm" => println!(
            "usage: posectl {cmd}\nReturns the pending trigger and clears it; each fires once."
        ),
        "events" => println!("usage: posectl events\nDrains UI events queued since the last call."),
        "reload" => println!(
            "usage: posectl reload\nReloads the current profile; keeps last good on error."
        ),
        "use" => {
            println!("usage: posectl use <name>\nSwitches active profile to <name> and restarts tracking.")
        }
        "list" => println!("usage: posectl list\nLists available profiles."),
        _ => {
            eprintln!("unknown command: {cmd}\n");
            print_help();
        }
    }
}

fn print_response(v: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(v).unwrap_or_default());
}
