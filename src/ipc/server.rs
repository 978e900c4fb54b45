use anyhow::{Context, Result, anyhow, bail};
use log::{error, info, warn};
use signal_hook::{
    consts::{SIGINT, SIGTERM},
    iterator::Signals,
};
use std::{
    fs,
    io::{self, BufRead, BufReader, Write},
    os::unix::net::{UnixListener, UnixStream},
    path::PathBuf,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Sender},
    },
    thread,
    time::Duration,
};

use super::dispatch::{OUTBOX_CAPACITY, Outbox, dispatch_event};
use super::runtime::socket_path;
use crate::config::DaemonConfigState;
use crate::engine::PoseEngine;
use crate::source::frame_source;

#[derive(Debug, Clone, Default)]
pub struct DaemonOptions {
    pub profile: Option<String>,
    pub replay: Option<PathBuf>,
}

/// Raised on SIGINT or SIGTERM.
pub fn shutdown_flag() -> Result<Arc<AtomicBool>> {
    let flag = Arc::new(AtomicBool::new(false));
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    let f = flag.clone();
    thread::Builder::new()
        .name("posectl-signals".into())
        .spawn(move || {
            if let Some(sig) = signals.forever().next() {
                info!("received signal {sig}; shutting down");
                f.store(true, Ordering::SeqCst);
            }
        })?;
    Ok(flag)
}

/// Loads the config state and switches to `profile` when one is named.
pub fn load_config(profile: Option<&str>) -> Result<DaemonConfigState> {
    let mut cfg = DaemonConfigState::load_or_install_default()?;
    if let Some(name) = profile {
        cfg.set_active(name)?;
    }
    Ok(cfg)
}

pub fn run_daemon(opts: DaemonOptions) -> Result<()> {
    // socket
    let sock = socket_path()?;
    if sock.exists() {
        if UnixStream::connect(&sock).is_ok() {
            bail!("daemon already running at {}", sock.display());
        }
        let _ = fs::remove_file(&sock);
    }
    let listener =
        UnixListener::bind(&sock).with_context(|| format!("binding {}", sock.display()))?;
    listener.set_nonblocking(true)?;
    info!("daemon: listening on {}", sock.display());

    // state
    let mut cfg = load_config(opts.profile.as_deref())?;
    info!("daemon: active profile '{}'", cfg.active_name);

    let source = frame_source(opts.replay.clone(), cfg.profile.source.frame_interval_ms);
    let engine = Arc::new(PoseEngine::new(cfg.profile.clone(), source));
    engine.start()?;

    let shutdown = shutdown_flag()?;
    let outbox = Arc::new(Mutex::new(Outbox::new(OUTBOX_CAPACITY)));
    let (tx_req, rx_req) = mpsc::channel::<IpcMsg>();

    while !shutdown.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _)) => {
                let client = Client {
                    engine: engine.clone(),
                    outbox: outbox.clone(),
                    active_profile: cfg.active_name.clone(),
                    profiles: cfg.list_profiles(),
                    tx_req: tx_req.clone(),
                };
                thread::spawn(move || {
                    if let Err(e) = client.handle(stream) {
                        error!("ipc client error: {e}");
                    }
                });
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => warn!("accept failed: {e}"),
        }

        let events = engine.poll_events();
        if !events.is_empty() {
            let mut out = outbox.lock().unwrap_or_else(|p| p.into_inner());
            for ev in events {
                dispatch_event(ev, &mut out);
            }
        }

        while let Ok(msg) = rx_req.try_recv() {
            match msg {
                IpcMsg::Reload => match cfg.reload() {
                    Ok(()) => {
                        restart(&engine, &cfg);
                        info!("profile reloaded");
                    }
                    Err(e) => error!("reload failed: {e}"),
                },
                IpcMsg::UseProfile(name) => match cfg.set_active(&name) {
                    Ok(()) => {
                        restart(&engine, &cfg);
                        info!("switched active profile to {}", cfg.active_name);
                    }
                    Err(e) => error!("use profile failed: {e}"),
                },
                IpcMsg::Shutdown => shutdown.store(true, Ordering::SeqCst),
            }
        }

        thread::sleep(Duration::from_millis(5));
    }

    info!("daemon: stopping engine");
    engine.stop();
    let _ = fs::remove_file(&sock);
    Ok(())
}

fn restart(engine: &PoseEngine, cfg: &DaemonConfigState) {
    engine.stop();
    engine.set_profile(cfg.profile.clone());
    if let Err(e) = engine.start() {
        error!("engine restart failed: {e}");
    }
}

enum IpcMsg {
    Reload,
    UseProfile(String),
    Shutdown,
}

struct Client {
    engine: Arc<PoseEngine>,
    outbox: Arc<Mutex<Outbox>>,
    active_profile: String,
    profiles: Vec<String>,
    tx_req: Sender<IpcMsg>,
}

impl Client {
    fn handle(self, mut stream: UnixStream) -> Result<()> {
        stream.set_nonblocking(false)?;
        let mut reader = BufReader::new(stream.try_clone()?);
        let mut line = String::new();
        reader.read_line(&mut line)?;
        if line.trim().is_empty() {
            return Ok(());
        }
        let req: serde_json::Value = serde_json::from_str(&line)?;
        let op = req.get("op").and_then(|v| v.as_str()).unwrap_or("");

        let resp = match op {
            "status" => {
                let frame = self.engine.frame();
                serde_json::json!({"ok": true, "data": {
                    "engine": self.engine.status(),
                    "running": self.engine.is_running(),
                    "active_profile": self.active_profile,
                    "socket": socket_path()?,
                    "cycle": frame.cycle,
                    "people": frame.tracks.len(),
                    "lobby": frame.lobby,
                    "lobby_remaining_ms": frame.lobby_remaining_ms,
                    "score": frame.score,
                }})
            }
            "poses" => serde_json::json!({"ok": true, "data": {
                "poses": self.engine.smoothed_poses(),
            }}),
            "gestures" => serde_json::json!({"ok": true, "data": {
                "gestures": self.engine.gestures(),
            }}),
            "frame" => serde_json::json!({"ok": true, "data": *self.engine.frame()}),
            "swipe" => serde_json::json!({"ok": true, "data": {
                "swipe": self.engine.take_swipe(),
            }}),
            "confirm" => serde_json::json!({"ok": true, "data": {
                "confirm": self.engine.take_confirm(),
            }}),
            "events" => {
                let events = self
                    .outbox
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .drain();
                serde_json::json!({"ok": true, "data": {"events": events}})
            }
            "lobby-reset" => {
                self.engine.reset_lobby();
                serde_json::json!({"ok": true, "data": "lobby reset"})
            }
            "reload" => {
                let _ = self.tx_req.send(IpcMsg::Reload);
                serde_json::json!({"ok": true, "data": {"active_profile": self.active_profile}})
            }
            "use" => {
                let name = req.get("profile").and_then(|v| v.as_str()).unwrap_or("");
                if name.is_empty() {
                    serde_json::json!({"ok": false, "error": "missing profile name"})
                } else if !self.profiles.iter().any(|p| p == name) {
                    serde_json::json!({"ok": false, "error": format!("profile not found: {name}")})
                } else {
                    let _ = self.tx_req.send(IpcMsg::UseProfile(name.to_string()));
                    serde_json::json!({"ok": true, "data": {"active_profile": name}})
                }
            }
            "list" => serde_json::json!({"ok": true, "data": {
                "profiles": self.profiles,
                "active": self.active_profile,
            }}),
            "shutdown" => {
                // reply first; the main loop removes the socket on its way out
                writeln!(
                    stream,
                    "{}",
                    serde_json::json!({"ok": true, "data": "shutting down"})
                )?;
                let _ = self.tx_req.send(IpcMsg::Shutdown);
                return Ok(());
            }
            _ => serde_json::json!({"ok": false, "error": format!("unknown op: {op}")}),
        };

        writeln!(stream, "{resp}")?;
        Ok(())
    }
}

// client helper
pub fn client_request(req: serde_json::Value) -> Result<serde_json::Value> {
    let sock = socket_path()?;
    if !sock.exists() {
        return Err(anyhow!(
            "posectl daemon is not running (socket missing at {})",
            sock.display()
        ));
    }
    let mut stream = UnixStream::connect(&sock)
        .with_context(|| format!("connecting to {}", sock.display()))?;
    let line = serde_json::to_string(&req)? + "\n";
    stream.write_all(line.as_bytes())?;
    let mut reader = BufReader::new(stream);
    let mut resp = String::new();
    reader.read_line(&mut resp)?;
    let v: serde_json::Value = serde_json::from_str(&resp)?;
    Ok(v)
}
