use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use tapedeck::bus::{Bus, MemoryBus};
use tapedeck::{
    CaptureReader, ContainerReader, ContainerWriter, Message, RecordControl, Recorder, Result,
};
use tempfile::tempdir;

#[test]
fn pause_drops_resume_records() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("paused.zet");
    let bus = Arc::new(MemoryBus::new());
    let mut recorder = Recorder::create(Arc::clone(&bus) as Arc<dyn Bus>, "t", &path, 0).expect("create");
    recorder.start().expect("start");

    recorder.pause();
    assert!(recorder.is_paused());
    for i in 0..5 {
        bus.publish("t", format!("paused {i}").as_bytes())
            .expect("publish");
    }
    recorder.resume();
    for i in 0..5 {
        bus.publish("t", format!("live {i}").as_bytes())
            .expect("publish");
    }
    recorder.stop().expect("stop");

    let stats = recorder.stats();
    assert_eq!(stats.messages_received, 10);
    assert_eq!(stats.messages_dropped, 5);
    assert_eq!(stats.messages_written, 5);
    assert!(!stats.buffer_overflow);

    // Only the post-resume messages made it to disk, in order.
    let mut reader = CaptureReader::open(&path).expect("open");
    for i in 0..5 {
        let msg = reader.next().expect("read").expect("message");
        assert_eq!(msg.payload, format!("live {i}").into_bytes());
        assert_eq!(msg.sent_ns, 0);
    }
    assert!(reader.next().expect("eof").is_none());
}

#[test]
fn stop_drains_everything_enqueued() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("drain.zet");
    let bus = Arc::new(MemoryBus::new());
    let mut recorder = Recorder::create(Arc::clone(&bus) as Arc<dyn Bus>, "t.>", &path, 0).expect("create");
    recorder.start().expect("start");

    for i in 0..200u32 {
        bus.publish("t.data", &i.to_le_bytes()).expect("publish");
    }
    recorder.stop().expect("stop");

    let stats = recorder.stats();
    assert_eq!(stats.messages_received, 200);
    assert_eq!(stats.messages_written, 200);
    assert_eq!(stats.messages_dropped, 0);
    assert!(!stats.buffer_overflow);
    assert!(stats.bytes_written > 0);

    let mut reader = CaptureReader::open(&path).expect("open");
    let mut prev_received = 0;
    for i in 0..200u32 {
        let msg = reader.next().expect("read").expect("message");
        assert_eq!(msg.subject, "t.data");
        assert_eq!(msg.payload, i.to_le_bytes());
        assert!(msg.received_ns >= prev_received);
        prev_received = msg.received_ns;
    }
    assert!(reader.next().expect("eof").is_none());
}

#[test]
fn deliveries_after_stop_are_not_recorded() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("late.zet");
    let bus = Arc::new(MemoryBus::new());
    let mut recorder = Recorder::create(Arc::clone(&bus) as Arc<dyn Bus>, "t", &path, 0).expect("create");
    recorder.start().expect("start");

    bus.publish("t", b"before").expect("publish");
    recorder.stop().expect("stop");
    bus.publish("t", b"after").expect("publish");

    let stats = recorder.stats();
    assert_eq!(stats.messages_written, 1);
    // The subscription is gone, so the late publish is not even received.
    assert_eq!(stats.messages_received, 1);
}

/// Container writer whose first `write` parks until the test releases it,
/// holding the drain still while the producer floods the ring.
struct GatedWriter {
    entered: mpsc::Sender<()>,
    gate: Arc<(Mutex<bool>, Condvar)>,
}

impl ContainerWriter for GatedWriter {
    fn write(&mut self, msg: &Message) -> Result<u64> {
        self.entered.send(()).ok();
        let (lock, cvar) = &*self.gate;
        let mut open = lock.lock().expect("gate lock");
        while !*open {
            open = cvar.wait(open).expect("gate wait");
        }
        Ok(msg.wire_size())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn start_time_ns(&self) -> u64 {
        0
    }
}

#[test]
fn saturated_ring_latches_overflow_and_counts_drops() {
    let bus = Arc::new(MemoryBus::new());
    let (entered_tx, entered_rx) = mpsc::channel();
    let gate = Arc::new((Mutex::new(false), Condvar::new()));
    let writer = Box::new(GatedWriter {
        entered: entered_tx,
        gate: Arc::clone(&gate),
    });

    let mut recorder =
        Recorder::with_writer(Arc::clone(&bus) as Arc<dyn Bus>, "t", writer, 4).expect("create");
    recorder.start().expect("start");

    // The writer pops the first message and parks inside write(), so the
    // ring stays untouched for the rest of the burst.
    bus.publish("t", b"first").expect("publish");
    entered_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("writer entered write()");

    for i in 0..10u32 {
        bus.publish("t", &i.to_le_bytes()).expect("publish");
    }

    // Capacity 4: exactly four of the burst fit, six are rejected.
    let stats = recorder.stats();
    assert_eq!(stats.messages_received, 11);
    assert_eq!(stats.messages_dropped, 6);
    assert!(stats.buffer_overflow);

    {
        let (lock, cvar) = &*gate;
        *lock.lock().expect("gate lock") = true;
        cvar.notify_all();
    }
    recorder.stop().expect("stop");

    let stats = recorder.stats();
    assert_eq!(stats.messages_received, 11);
    assert_eq!(stats.messages_dropped, 6);
    assert_eq!(stats.messages_written, 5);
    assert!(stats.buffer_overflow);
}

#[test]
fn two_recorders_capture_independently() {
    let dir = tempdir().expect("tempdir");
    let bus = Arc::new(MemoryBus::new());
    let path_a = dir.path().join("a.zet");
    let path_b = dir.path().join("b.zet");

    let mut recorder_a =
        Recorder::create(Arc::clone(&bus) as Arc<dyn Bus>, "alpha", &path_a, 0).expect("create a");
    let mut recorder_b =
        Recorder::create(Arc::clone(&bus) as Arc<dyn Bus>, "beta", &path_b, 0).expect("create b");
    recorder_a.start().expect("start a");
    recorder_b.start().expect("start b");

    bus.publish("alpha", b"for a").expect("publish");
    bus.publish("beta", b"for b").expect("publish");
    bus.publish("alpha", b"for a again").expect("publish");

    recorder_a.stop().expect("stop a");
    recorder_b.stop().expect("stop b");

    assert_eq!(recorder_a.stats().messages_written, 2);
    assert_eq!(recorder_b.stats().messages_written, 1);

    let mut reader = CaptureReader::open(&path_b).expect("open");
    let msg = reader.next().expect("read").expect("message");
    assert_eq!(msg.subject, "beta");
    assert_eq!(msg.payload, b"for b");
}
