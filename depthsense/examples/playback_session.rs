use depthsense::backend::{DummyBackend, SyntheticDriver};
use depthsense::image_ops::depth_preview;
use depthsense::{FrameOrchestrator, PlaybackDriver, RecordingDriver, SessionConfig, SlotEvent};
use std::path::PathBuf;

const TICKS: usize = 90;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    depthsense::init()?;

    let out_dir = PathBuf::from(std::env::args().nth(1).unwrap_or_else(|| "target/playback".into()));
    std::fs::create_dir_all(&out_dir)?;
    let recording = out_dir.join("two_people.jsonl");

    println!("Recording a synthetic two-person scene...");
    {
        let driver = RecordingDriver::new(Box::new(SyntheticDriver::new(2)), &recording);
        let mut session =
            FrameOrchestrator::new(Box::new(DummyBackend::new(Box::new(driver))), SessionConfig::default())?;
        for tick in 0..TICKS {
            session.tick_at(tick as f64 / 30.0)?;
        }
    }
    println!("  wrote {}", recording.display());

    println!("Replaying {}...", recording.display());
    let driver = PlaybackDriver::open(&recording)?;
    println!("  {} frame sets", driver.frame_count());
    let mut session = FrameOrchestrator::new(Box::new(DummyBackend::new(Box::new(driver))), SessionConfig::default())?;

    for tick in 0..TICKS {
        let report = session.tick_at(tick as f64 / 30.0)?;
        for event in &report.events {
            match event {
                SlotEvent::UserDetected { slot, tracking_id } => {
                    println!("  tick {tick}: user {tracking_id} detected in slot {slot}")
                }
                SlotEvent::UserLost { slot, tracking_id } => {
                    println!("  tick {tick}: user {tracking_id} lost from slot {slot}")
                }
            }
        }
    }

    for slot in session.tracked_slots() {
        if let Some(body) = session.body(slot) {
            let hand = body.joint(bodytrack::JointType::HandRight);
            println!(
                "  slot {slot}: root ({:.2}, {:.2}, {:.2}), right hand speed {:.2} m/s",
                body.position.x,
                body.position.y,
                body.position.z,
                hand.pos_vel.norm()
            );
        }
    }

    let caps = session.capabilities();
    let preview = depth_preview(session.depth_frame().view(), caps.min_depth_mm, caps.max_depth_mm);
    let preview_path = out_dir.join("depth.png");
    preview.save(&preview_path)?;
    session.user_silhouette().save(out_dir.join("users.png"))?;
    println!("Saved {} and users.png", preview_path.display());

    Ok(())
}
