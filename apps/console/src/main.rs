mod config;
mod file_log;
mod sim;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use console_core::log::CommandLog;
use console_core::telemetry::Hz;
use console_core::{Notice, Session};
use geometry::OrientationPreset;
use link::{LinkConnector, LoopbackLink, MissingLinkConnector};
use shared::domain::{CommandKind, Peer};
use shared::protocol::InboundEvent;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use zframe::{
    CalibrationRequest, RegionOfInterest, RegistrationService, VolumeWorkbench, ZFrameKind,
    ZFrameTopology,
};

#[derive(Parser, Debug)]
struct Args {
    /// Z-frame hardware model: z001, z002 or z003.
    #[arg(long, default_value = "z001")]
    zframe: String,
    /// Skip the in-process robot and scanner simulators; sends are then
    /// rejected until a real transport is attached.
    #[arg(long)]
    no_simulate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let args = Args::parse();
    let settings = config::load_settings();

    let zframe_kind = ZFrameKind::from_name(&args.zframe)
        .with_context(|| format!("unknown z-frame model {:?}", args.zframe))?;

    let (robot_link, robot_remote, mut robot_inbound) = LoopbackLink::pair(Peer::Robot);
    let (scanner_link, scanner_remote, mut scanner_inbound) = LoopbackLink::pair(Peer::Scanner);
    let mut idle_remotes = None;
    let (robot_conn, scanner_conn): (Box<dyn LinkConnector>, Box<dyn LinkConnector>) =
        if !args.no_simulate {
            let _robot_sim = sim::spawn_robot(robot_remote);
            let _scanner_sim = sim::spawn_scanner(scanner_remote);
            (Box::new(robot_link), Box::new(scanner_link))
        } else {
            // No transport attached: every send is rejected at the boundary.
            idle_remotes = Some((robot_remote, scanner_remote));
            (
                Box::new(MissingLinkConnector::new(Peer::Robot)),
                Box::new(MissingLinkConnector::new(Peer::Scanner)),
            )
        };
    let _idle_remotes = idle_remotes;

    let mut log = file_log::FileLog::open(Path::new(&settings.command_log_path))?;
    log.session_banner("console session");
    let mut session = Session::new(robot_conn, scanner_conn, Box::new(log));

    let mut workbench = sim::DemoWorkbench::new();
    let registration = sim::DemoRegistration;
    let topology = load_topology(&settings.zframe_config_dir, zframe_kind)?;

    let mut position_timer = tokio::time::interval(Hz::new(settings.position_rate_hz).interval());
    let mut plane_timer = tokio::time::interval(Hz::new(settings.scan_plane_rate_hz).interval());
    let mut tip_timer = tokio::time::interval(Hz::new(settings.tracked_tip_rate_hz).interval());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    info!("console ready; type `help` for commands");

    loop {
        tokio::select! {
            message = robot_inbound.recv() => {
                let Some(message) = message else { break };
                dispatch_inbound(&mut session, Peer::Robot, &message).await;
            }
            message = scanner_inbound.recv() => {
                let Some(message) = message else { break };
                dispatch_inbound(&mut session, Peer::Scanner, &message).await;
            }
            _ = position_timer.tick() => {
                if let Err(error) = session.position_tick().await {
                    warn!(%error, "position poll failed");
                }
            }
            _ = plane_timer.tick() => {
                if let Err(error) = session.scan_plane_tick().await {
                    warn!(%error, "scan plane tick failed");
                }
            }
            _ = tip_timer.tick() => {
                if let Err(error) = session.tracked_tip_tick().await {
                    warn!(%error, "tracked tip tick failed");
                }
            }
            line = lines.next_line() => {
                let Ok(Some(line)) = line else { break };
                if !run_line(
                    &mut session,
                    &settings,
                    &mut workbench,
                    &registration,
                    &topology,
                    zframe_kind,
                    line.trim(),
                )
                .await
                {
                    break;
                }
            }
        }
    }
    Ok(())
}

async fn dispatch_inbound(session: &mut Session, peer: Peer, message: &shared::protocol::Message) {
    let event = match InboundEvent::parse(peer, message) {
        Ok(event) => event,
        Err(error) => {
            warn!(%error, name = %message.name, "dropping unrecognized inbound message");
            return;
        }
    };
    match session.handle_inbound(event).await {
        Ok(notice) => report(&notice),
        Err(error) => warn!(%error, "inbound event failed"),
    }
}

fn report(notice: &Notice) {
    match notice {
        Notice::Transition(outcome) => println!("<< {outcome:?}"),
        Notice::Acknowledged { command } => println!("<< acknowledged {}", command.wire_name()),
        Notice::PositionUpdated => {}
        other => println!("<< {other:?}"),
    }
}

async fn run_line(
    session: &mut Session,
    settings: &config::Settings,
    workbench: &mut dyn VolumeWorkbench,
    registration: &dyn RegistrationService,
    topology: &ZFrameTopology,
    zframe_kind: ZFrameKind,
    line: &str,
) -> bool {
    let mut parts = line.split_whitespace();
    let verb = parts.next().unwrap_or("");
    let arg = parts.next();

    let command = match verb {
        "" => return true,
        "quit" | "exit" => return false,
        "help" => {
            print_help();
            return true;
        }
        "startup" => Some(CommandKind::StartUp),
        "calibration" => Some(CommandKind::Calibration),
        "planning" => Some(CommandKind::Planning),
        "targeting" => Some(CommandKind::Targeting),
        "move" => Some(CommandKind::MoveToTarget),
        "stop" => Some(CommandKind::Stop),
        "emergency" => Some(CommandKind::Emergency),
        "retract" => Some(CommandKind::RetractNeedle),
        "status" => Some(CommandKind::GetStatus),
        "seq" => match arg {
            Some("start") => Some(CommandKind::StartSequence),
            Some("stop") => Some(CommandKind::StopSequence),
            _ => {
                println!("usage: seq start|stop");
                None
            }
        },
        _ => None,
    };
    if let Some(command) = command {
        match session.send_command(command).await {
            Ok(id) => println!(">> {id}"),
            Err(error) => println!("!! {error}"),
        }
        return true;
    }

    match (verb, arg) {
        ("pos", Some("on")) => {
            session.start_position_polling(Hz::new(settings.position_rate_hz));
        }
        ("pos", Some("off")) => {
            if let Err(error) = session.stop_position_polling().await {
                println!("!! {error}");
            }
        }
        ("plane", Some("on")) => {
            session.start_scan_plane_stream(Hz::new(settings.scan_plane_rate_hz));
        }
        ("plane", Some("off")) => session.stop_scan_plane_stream(),
        ("plane", Some("axial")) => session.apply_scan_plane_preset(OrientationPreset::Axial),
        ("plane", Some("coronal")) => session.apply_scan_plane_preset(OrientationPreset::Coronal),
        ("plane", Some("sagittal")) => {
            session.apply_scan_plane_preset(OrientationPreset::Sagittal)
        }
        ("plane", Some("follow")) => session.set_scan_plane_follows_robot(true),
        ("plane", Some("fixed")) => session.set_scan_plane_follows_robot(false),
        ("tip", Some("on")) => {
            session.arm_tracked_tip(true, Hz::new(settings.tracked_tip_rate_hz))
        }
        ("tip", Some("off")) => session.arm_tracked_tip(false, Hz::new(settings.tracked_tip_rate_hz)),
        ("target", _) => {
            let point = parse_point(line);
            match point {
                Some(point) => {
                    session.set_planned_target_point(point);
                    println!("planned target at {point:?}");
                }
                None => println!("usage: target <r> <a> <s>"),
            }
        }
        ("calibrate", _) => {
            run_calibration(
                session,
                settings,
                workbench,
                registration,
                topology,
                zframe_kind,
            )
            .await;
        }
        ("sendcal", _) => match session.send_calibration().await {
            Ok(id) => println!(">> {id}"),
            Err(error) => println!("!! {error}"),
        },
        ("show", _) => show_state(session),
        _ => println!("unknown command {verb:?}; type `help`"),
    }
    true
}

async fn run_calibration(
    session: &mut Session,
    settings: &config::Settings,
    workbench: &mut dyn VolumeWorkbench,
    registration: &dyn RegistrationService,
    topology: &ZFrameTopology,
    zframe_kind: ZFrameKind,
) {
    let request = CalibrationRequest {
        kind: zframe_kind,
        topology: topology.clone(),
        roi: Some(RegionOfInterest {
            min_ras: [-50.0, -50.0, 15.0],
            max_ras: [50.0, 50.0, 45.0],
        }),
        manual_range: None,
        manual_fiducials: None,
    };
    let deadline = Duration::from_secs(settings.registration_timeout_secs);
    match zframe::calibrate(workbench, registration, &request, deadline).await {
        Ok(result) => {
            println!(
                "calibration solved over slices {}..={}",
                result.range.start, result.range.end
            );
            session.set_calibration(result);
        }
        Err(error) => println!("!! calibration failed: {error}"),
    }
}

fn show_state(session: &Session) {
    println!("phase: {:?}", session.phase());
    for (label, transform) in [
        ("current position", session.current_position()),
        ("position (base)", session.current_position_base()),
        ("reachable target", session.reachable_target()),
        ("planned target", session.planned_target()),
    ] {
        match transform {
            Some(transform) => match serde_json::to_string(transform.rows()) {
                Ok(rows) => println!("{label}: {rows}"),
                Err(_) => println!("{label}: <unprintable>"),
            },
            None => println!("{label}: none"),
        }
    }
}

fn parse_point(line: &str) -> Option<[f64; 3]> {
    let mut parts = line.split_whitespace().skip(1);
    let r = parts.next()?.parse().ok()?;
    let a = parts.next()?.parse().ok()?;
    let s = parts.next()?.parse().ok()?;
    Some([r, a, s])
}

fn load_topology(dir: &str, kind: ZFrameKind) -> Result<ZFrameTopology> {
    let path = PathBuf::from(dir).join(kind.config_file_name());
    match std::fs::read_to_string(&path) {
        Ok(text) => {
            ZFrameTopology::parse(&text).with_context(|| format!("parsing {}", path.display()))
        }
        Err(_) => {
            warn!(path = %path.display(), "topology file missing, using built-in default");
            ZFrameTopology::parse(DEFAULT_TOPOLOGY).context("parsing built-in topology")
        }
    }
}

const DEFAULT_TOPOLOGY: &str = "\
Side 1: 30.0 30.0 -30.0 30.0 -30.0 -30.0
Side 2: -30.0 -30.0 -30.0 -30.0 30.0 -30.0
Base: -30.0 -30.0 -30.0 30.0 -30.0 -30.0
";

fn print_help() {
    println!(
        "\
workflow:  startup calibration planning targeting move stop emergency retract status
scanner:   seq start|stop
telemetry: pos on|off, plane on|off|axial|coronal|sagittal|follow|fixed, tip on|off
planning:  target <r> <a> <s>
z-frame:   calibrate, sendcal
misc:      show, help, quit"
    );
}
