//! Scripted end-to-end demo of the capture pipeline.
//!
//! Runs a full session against stub hardware: a synthetic camera, a
//! detector scripted with a handful of frames, and an immediate location
//! fix, submitting into an in-process ingestion service and printing the
//! resulting leaderboard.

use anyhow::Result;
use clap::Parser;
use std::sync::{Arc, Mutex};

use greenloop::detect::Detection;
use greenloop::geo::{GeoGate, LocationFix, StubLocationProvider};
use greenloop::service::{InProcessSink, SubmissionService};
use greenloop::store::InMemorySubmissionStore;
use greenloop::{OwnerIdentity, ScriptedDetector, Session, StubCamera};

#[derive(Parser, Debug)]
#[command(name = "capture-demo", about = "Run one scripted capture session")]
struct Args {
    /// Owner to attribute the submission to
    #[arg(long, default_value = "demo")]
    owner: String,

    /// Number of scripted frames to process
    #[arg(long, default_value_t = 3)]
    frames: usize,

    /// Skip the location fix (session still completes, location is null)
    #[arg(long)]
    no_location: bool,
}

fn scripted_frames(frames: usize) -> Vec<Vec<Detection>> {
    let script = [
        vec![
            Detection::new("bottle", 0.91),
            Detection::new("banana", 0.52),
        ],
        vec![Detection::new("cell phone", 0.40)],
        vec![
            Detection::new("cup", 0.67),
            Detection::new("person", 0.99),
        ],
    ];
    script.into_iter().cycle().take(frames).collect()
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let geo = if args.no_location {
        GeoGate::unsupported()
    } else {
        GeoGate::new(Arc::new(StubLocationProvider::Immediate(LocationFix {
            latitude: 43.79,
            longitude: -79.19,
            accuracy_m: 8.0,
            captured_at_ms: greenloop::now_ms()?,
        })))
    };

    let mut session = Session::new(
        StubCamera::new(640, 480),
        ScriptedDetector::new(scripted_frames(args.frames)),
        geo,
    );

    session.acquire()?;
    session.start_recording()?;
    for _ in 0..args.frames {
        if let Some(detections) = session.process_next_frame()? {
            for object in &detections {
                log::info!(
                    "detected {} ({:?}, score {:.2})",
                    object.label,
                    object.category,
                    object.confidence
                );
            }
        }
    }
    session.stop()?;

    let summary = session.summary();
    log::info!(
        "session summary: recyclable={} compost={} trash={}",
        summary.counts.recyclable,
        summary.counts.compost,
        summary.counts.trash
    );

    let service = Arc::new(Mutex::new(SubmissionService::new(
        InMemorySubmissionStore::new(),
    )));
    let owner = OwnerIdentity {
        owner_id: args.owner.clone(),
        display_name: args.owner,
        avatar: None,
    };
    let mut sink = InProcessSink::new(service.clone(), owner);
    let record = session.send(&mut sink)?;
    log::info!(
        "submission #{} accepted (location attached: {})",
        record.id,
        record.location.is_some()
    );

    let mut guard = service
        .lock()
        .map_err(|_| anyhow::anyhow!("service mutex poisoned"))?;
    for (position, user) in guard.list_users()?.iter().enumerate() {
        log::info!(
            "#{} {} total={} level={}",
            position + 1,
            user.display_name,
            user.total_items,
            user.level
        );
    }
    Ok(())
}
