use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::Result;

use live_inference::detect::DEFAULT_TRACKED_CLASSES;
use live_inference::ingest::{device_opener, SyntheticCapture};
use live_inference::{
    Annotator, BBox, CaptureDevice, ClassId, Detection, DeviceOpener, Frame, FrameSource,
    InferenceAdapter, LineAxis, LoopSettings, MemorySink, Overrides, Pipeline, PipelineConfig,
    SplitBoundary, StepOutcome, StubBackend, ZoneConfig, ZoneCounter,
};

const CAR: ClassId = ClassId(2);
const TRUCK: ClassId = ClassId(7);

/// Capture device that replays a shared script: `Some` yields the frame,
/// `None` is a failed read. An exhausted script keeps failing.
struct ScriptedCapture {
    script: Arc<Mutex<VecDeque<Option<Frame>>>>,
}

impl CaptureDevice for ScriptedCapture {
    fn grab(&mut self) {}

    fn retrieve(&mut self) -> Result<Option<Frame>> {
        Ok(self.script.lock().unwrap().pop_front().flatten())
    }
}

fn scripted_source(script: Vec<Option<Frame>>) -> (FrameSource, Arc<AtomicUsize>) {
    let script = Arc::new(Mutex::new(VecDeque::from(script)));
    let opens = Arc::new(AtomicUsize::new(0));
    let counter = opens.clone();
    let opener: DeviceOpener = Arc::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedCapture {
            script: script.clone(),
        }) as Box<dyn CaptureDevice>)
    });
    let source = FrameSource::start("scripted", opener).expect("start scripted source");
    (source, opens)
}

/// Reference geometry: line 1500, split 2000, offset 8, scaled to 50%.
fn reference_zone() -> ZoneConfig {
    ZoneConfig {
        line: 1500,
        split: 2000,
        offset: 8,
        axis: LineAxis::Horizontal,
        split_boundary: SplitBoundary::Inclusive,
        tracked_classes: DEFAULT_TRACKED_CLASSES.to_vec(),
    }
    .scaled(50)
}

fn full_frame() -> Frame {
    Frame::filled(3840, 2160, [90, 90, 90]).expect("full resolution frame")
}

fn settings(scale_percent: u32) -> LoopSettings {
    LoopSettings {
        scale_percent,
        retry_delay: Duration::from_millis(10),
        reconnect_after: 0,
    }
}

#[test]
fn car_on_the_line_counts_in_at_half_scale() -> Result<()> {
    let (source, _) = scripted_source(vec![Some(full_frame())]);
    // Box given in full-resolution coordinates; the stub rescales it to the
    // frame it is shown, which is (50, 745, 70, 755) after the 50% resize.
    let car = Detection::new(BBox::new(100., 1490., 140., 1510.), 0.9, CAR);
    let backend = StubBackend::new()
        .with_script(vec![vec![car]])
        .with_reference(3840, 2160);
    let adapter = InferenceAdapter::new(Box::new(backend), 0.7, DEFAULT_TRACKED_CLASSES);

    let zone = reference_zone();
    assert_eq!((zone.line, zone.split, zone.offset), (750, 1000, 4));

    let mut pipeline = Pipeline::new(source, adapter, MemorySink::default(), settings(50))
        .with_counter(ZoneCounter::new(zone))
        .with_annotator(Annotator::new(50));

    match pipeline.step()? {
        StepOutcome::Published { detections, tally } => {
            assert_eq!(detections, 1);
            assert_eq!(tally.map(|t| t.entered), Some(1));
        }
        StepOutcome::NoFrame => panic!("expected a published frame"),
    }

    let counters = pipeline.counters().expect("counting enabled");
    assert_eq!(counters.total_in, 1);
    assert_eq!(counters.class_in(CAR), 1);
    assert_eq!(counters.total_out, 0);
    assert!(counters.per_class_out.values().all(|n| *n == 0));

    assert_eq!(pipeline.sink().frames.len(), 1);
    assert_eq!(pipeline.sink().frames[0].dimensions(), (1920, 1080));

    pipeline.close()?;
    Ok(())
}

#[test]
fn default_config_counts_on_decoded_frames() -> Result<()> {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile()?;
    let toml = r#"
[model]
path = "stub://yolo"

[input]
url = "stub://camera"

[output]
url = "/tmp/counted.mkv"
"#;
    std::io::Write::write_all(&mut file, toml.as_bytes())?;
    let config = PipelineConfig::load_from(Some(file.path()), &Overrides::default())?;

    let source = FrameSource::start(
        config.input.url.clone(),
        device_opener(config.input.clone()),
    )?;
    let car = Detection::new(BBox::new(100., 1490., 140., 1510.), 0.9, CAR);
    let backend = StubBackend::new()
        .with_detections(vec![car])
        .with_reference(config.input.width, config.input.height);
    let adapter = InferenceAdapter::new(
        Box::new(backend),
        config.model.confidence,
        config.model.class_ids.clone(),
    );
    let mut pipeline = Pipeline::new(
        source,
        adapter,
        MemorySink::default(),
        settings(config.scale_percent),
    )
    .with_counter(ZoneCounter::new(config.zone_config()));

    assert!(matches!(pipeline.step()?, StepOutcome::Published { .. }));
    let published = pipeline.sink().frames[0].dimensions();
    assert_eq!(published, (config.input.width / 2, config.input.height / 2));
    assert_eq!(pipeline.counters().map(|c| c.total_in), Some(1));

    pipeline.close()?;
    Ok(())
}

#[test]
fn capture_failure_then_success_keeps_running() -> Result<()> {
    let frame = Frame::filled(64, 48, [0, 0, 0])?;
    let (source, _) = scripted_source(vec![None, Some(frame)]);
    let adapter = InferenceAdapter::new(Box::new(StubBackend::new()), 0.7, Vec::new());
    let mut pipeline = Pipeline::new(source, adapter, MemorySink::default(), settings(100));

    assert_eq!(pipeline.step()?, StepOutcome::NoFrame);
    assert!(matches!(pipeline.step()?, StepOutcome::Published { .. }));
    assert_eq!(pipeline.sink().frames.len(), 1);
    assert_eq!(pipeline.sink().frames[0].dimensions(), (64, 48));

    pipeline.close()?;
    Ok(())
}

#[test]
fn model_failure_ends_the_run() -> Result<()> {
    let frame = Frame::filled(16, 16, [0, 0, 0])?;
    let (source, _) = scripted_source(vec![Some(frame.clone()), Some(frame)]);
    let backend = StubBackend::new().failing_after(0);
    let adapter = InferenceAdapter::new(Box::new(backend), 0.7, Vec::new());
    let mut pipeline = Pipeline::new(source, adapter, MemorySink::default(), settings(100));

    let err = pipeline.step().expect_err("model failure is fatal");
    assert!(format!("{:#}", err).contains("inference failed"));
    assert!(pipeline.sink().frames.is_empty());

    let shutdown = AtomicBool::new(false);
    assert!(pipeline.run(&shutdown).is_err());
    Ok(())
}

#[test]
fn repeated_capture_failures_reconnect() -> Result<()> {
    let (source, opens) = scripted_source(Vec::new());
    let adapter = InferenceAdapter::new(Box::new(StubBackend::new()), 0.7, Vec::new());
    let settings = LoopSettings {
        reconnect_after: 2,
        ..settings(100)
    };
    let mut pipeline = Pipeline::new(source, adapter, MemorySink::default(), settings);

    assert_eq!(pipeline.step()?, StepOutcome::NoFrame);
    assert_eq!(opens.load(Ordering::SeqCst), 1);
    assert_eq!(pipeline.step()?, StepOutcome::NoFrame);
    assert_eq!(opens.load(Ordering::SeqCst), 2);
    assert_eq!(pipeline.step()?, StepOutcome::NoFrame);
    assert_eq!(opens.load(Ordering::SeqCst), 2);

    pipeline.close()?;
    Ok(())
}

#[test]
fn counters_only_grow_over_a_run() -> Result<()> {
    let frames = (0..4)
        .map(|_| Some(Frame::filled(2000, 1000, [0, 0, 0]).expect("frame")))
        .collect();
    let (source, _) = scripted_source(frames);

    let at = |cx: f32, cy: f32, class: ClassId| {
        Detection::new(BBox::new(cx - 10., cy - 10., cx + 10., cy + 10.), 0.9, class)
    };
    let backend = StubBackend::new().with_script(vec![
        vec![at(60., 750., CAR)],
        vec![],
        vec![at(1200., 752., TRUCK), at(400., 300., CAR)],
        vec![at(900., 748., ClassId(5)), at(1500., 751., ClassId(0))],
    ]);
    let adapter = InferenceAdapter::new(Box::new(backend), 0.7, Vec::new());
    let mut pipeline = Pipeline::new(source, adapter, MemorySink::default(), settings(100))
        .with_counter(ZoneCounter::new(reference_zone()));

    let mut previous = pipeline.counters().expect("counting enabled").clone();
    for _ in 0..4 {
        pipeline.step()?;
        let now = pipeline.counters().expect("counting enabled");
        assert!(now.dominates(&previous));
        previous = now.clone();
    }

    assert_eq!(previous.total_in, 2);
    assert_eq!(previous.total_out, 1);
    assert_eq!(previous.class_in(CAR), 1);
    assert_eq!(previous.class_in(ClassId(5)), 1);
    assert_eq!(previous.class_out(TRUCK), 1);
    assert!(!previous.per_class_in.contains_key(&ClassId(0)));

    pipeline.close()?;
    Ok(())
}

#[test]
fn shutdown_signal_stops_a_synthetic_run() -> Result<()> {
    let opener: DeviceOpener = Arc::new(|| {
        Ok(Box::new(SyntheticCapture::new("stub://camera", 64, 36)) as Box<dyn CaptureDevice>)
    });
    let source = FrameSource::start("stub://camera", opener)?;
    let adapter = InferenceAdapter::new(Box::new(StubBackend::new()), 0.7, Vec::new());
    let mut pipeline = Pipeline::new(source, adapter, MemorySink::default(), settings(50))
        .with_annotator(Annotator::new(50));

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(200));
        flag.store(true, Ordering::SeqCst);
    });

    pipeline.run(&shutdown)?;
    stopper.join().expect("stopper thread");

    let sink = pipeline.sink();
    assert!(sink.finished);
    assert!(!sink.frames.is_empty());
    assert!(sink.frames.iter().all(|f| f.dimensions() == (32, 18)));
    assert!(sink.frames.windows(2).all(|w| w[0].sequence < w[1].sequence));
    Ok(())
}
