use bodytrack::{BodyData, BodySlotTracker, JointSmoother, JointType, RawBodyFrame, TrackingState};
use nalgebra::Vector3;

fn body(tracking_id: u64, x: f32, jitter: f32) -> BodyData {
    let mut body = BodyData::default();
    body.is_tracked = true;
    body.tracking_id = tracking_id;
    for joint in JointType::ALL {
        let j = body.joint_mut(joint);
        j.tracking_state = TrackingState::Tracked;
        j.position = Vector3::new(x + jitter, 0.1 + 0.06 * joint.index() as f32, 2.0);
    }
    body
}

fn main() -> anyhow::Result<()> {
    println!("Slot tracking with smoothing...");

    let mut tracker = BodySlotTracker::new(6, 1.0);
    let mut smoother = JointSmoother::positions(6);
    let mut slot_frame = RawBodyFrame::new(6);

    // (time, [(device index, tracking id)])
    let script: [(f64, &[(usize, u64)]); 5] = [
        (0.0, &[(0, 5)]),
        (0.1, &[(0, 9), (1, 5)]), // device reorders its bodies
        (0.2, &[(3, 9)]),         // id 5 briefly occluded
        (0.4, &[(1, 5), (2, 9)]),
        (1.6, &[(0, 9)]), // id 5 gone long enough to be evicted
    ];

    for (tick, (now, bodies)) in script.iter().enumerate() {
        let mut device = RawBodyFrame::new(6);
        for &(index, id) in bodies.iter() {
            let jitter = if tick % 2 == 0 { 0.01 } else { -0.01 };
            device.bodies[index] = body(id, id as f32 * 0.1, jitter);
        }

        let update = tracker.update(&device, &mut slot_frame, *now);
        smoother.update_frame(&mut slot_frame);
        for (id, slot) in &update.released {
            smoother.reset_slot(*slot);
            println!("  t={now:.1}: id {id} released slot {slot}");
        }

        println!("t={now:.1}: {} tracked", slot_frame.tracked_count());
        for (slot, body) in slot_frame.bodies.iter().enumerate() {
            if body.is_tracked {
                let head = body.joint(JointType::Head).position;
                println!(
                    "  slot {slot}: id {} head [{:.3}, {:.3}, {:.3}]",
                    body.tracking_id, head.x, head.y, head.z
                );
            }
        }
    }

    Ok(())
}
