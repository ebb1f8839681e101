//! Wake word detector integration tests
//!
//! Drive the detector with a scripted classifier over a real stream.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use wakeline::wake_word::{Classifier, DetectorState, EnergyClassifier, MatchResult};
use wakeline::{BoundedStream, WakeWordDetector, WakeWordEvent, WakeWordObserver};

mod common;

use common::{
    RecordingObserver, SAMPLE_RATE, ScriptedClassifier, generate_silence, generate_sine_samples,
    wait_until,
};

const POLL: Duration = Duration::from_millis(5);
const WAIT: Duration = Duration::from_secs(2);

fn recognized(events: &[WakeWordEvent]) -> Vec<(String, usize)> {
    events
        .iter()
        .filter_map(|e| match e {
            WakeWordEvent::Recognized { word, position } => Some((word.clone(), *position)),
            WakeWordEvent::LifecycleChanged(_) => None,
        })
        .collect()
}

fn lifecycle(events: &[WakeWordEvent]) -> Vec<DetectorState> {
    events
        .iter()
        .filter_map(|e| match e {
            WakeWordEvent::LifecycleChanged(state) => Some(*state),
            WakeWordEvent::Recognized { .. } => None,
        })
        .collect()
}

#[test]
fn test_lifecycle_active_then_stopped() {
    let stream = BoundedStream::<i16>::new(1024);
    let recorder = Arc::new(RecordingObserver::default());

    let mut detector = WakeWordDetector::spawn(
        stream.create_reader(),
        Box::new(ScriptedClassifier::default()),
        vec!["alexa".to_string()],
        POLL,
        vec![recorder.clone()],
    )
    .unwrap();

    assert!(wait_until(WAIT, || !recorder.events().is_empty()));
    assert_eq!(detector.state(), DetectorState::Active);

    detector.stop();

    assert_eq!(
        lifecycle(&recorder.events()),
        vec![DetectorState::Active, DetectorState::Stopped]
    );
    assert_eq!(detector.state(), DetectorState::Stopped);
}

#[test]
fn test_recognized_position_rewinds_to_matching_block() {
    let stream = BoundedStream::<i16>::new(4096);
    let writer = stream.create_writer().unwrap();
    let consumer = stream.create_reader();
    let classifier = ScriptedClassifier::new([MatchResult::NoMatch, MatchResult::Match(1)]);
    let recorder = Arc::new(RecordingObserver::default());

    let _detector = WakeWordDetector::spawn(
        stream.create_reader(),
        Box::new(classifier.clone()),
        vec!["alexa".to_string()],
        POLL,
        vec![recorder.clone()],
    )
    .unwrap();

    let lead_in = vec![1_i16; 100];
    let keyword = vec![7_i16; 50];

    writer.write(&lead_in);
    assert!(wait_until(WAIT, || classifier.blocks().len() == 1));
    writer.write(&keyword);
    assert!(wait_until(WAIT, || !recognized(&recorder.events()).is_empty()));

    let hits = recognized(&recorder.events());
    assert_eq!(hits, vec![("alexa".to_string(), 100)]);

    // A consumer that fell behind rewinds and replays from the matching block
    consumer.set_position(hits[0].1).unwrap();
    let replay = consumer.read_available();
    assert_eq!(replay, keyword);
}

#[test]
fn test_match_index_maps_to_configured_word() {
    let stream = BoundedStream::<i16>::new(1024);
    let writer = stream.create_writer().unwrap();
    let classifier = ScriptedClassifier::new([MatchResult::Match(2), MatchResult::Match(9)]);
    let recorder = Arc::new(RecordingObserver::default());

    let _detector = WakeWordDetector::spawn(
        stream.create_reader(),
        Box::new(classifier.clone()),
        vec!["Alexa".to_string(), " Computer ".to_string()],
        POLL,
        vec![recorder.clone()],
    )
    .unwrap();

    writer.write(&[1; 10]);
    assert!(wait_until(WAIT, || classifier.blocks().len() == 1));
    writer.write(&[2; 10]);
    assert!(wait_until(WAIT, || classifier.blocks().len() == 2));

    // Index 9 is out of range and ignored
    std::thread::sleep(POLL * 4);
    assert_eq!(recognized(&recorder.events()), vec![("computer".to_string(), 0)]);
}

#[test]
fn test_classifier_error_keeps_polling() {
    let stream = BoundedStream::<i16>::new(1024);
    let writer = stream.create_writer().unwrap();
    let classifier = ScriptedClassifier::new([
        MatchResult::Error,
        MatchResult::NoMatch,
        MatchResult::Match(1),
    ]);
    let recorder = Arc::new(RecordingObserver::default());

    let mut detector = WakeWordDetector::spawn(
        stream.create_reader(),
        Box::new(classifier.clone()),
        vec!["alexa".to_string()],
        POLL,
        vec![recorder.clone()],
    )
    .unwrap();

    for (i, block) in [[1_i16; 8], [2; 8], [3; 8]].iter().enumerate() {
        writer.write(block);
        assert!(wait_until(WAIT, || classifier.blocks().len() == i + 1));
    }
    assert!(wait_until(WAIT, || !recognized(&recorder.events()).is_empty()));

    detector.stop();

    let events = recorder.events();
    assert_eq!(
        lifecycle(&events),
        vec![
            DetectorState::Active,
            DetectorState::Errored,
            DetectorState::Active,
            DetectorState::Stopped,
        ]
    );
    assert_eq!(recognized(&events), vec![("alexa".to_string(), 16)]);
}

#[test]
fn test_nothing_classified_without_audio() {
    let stream = BoundedStream::<i16>::new(1024);
    let _writer = stream.create_writer().unwrap();
    let classifier = ScriptedClassifier::default();

    let _detector = WakeWordDetector::spawn(
        stream.create_reader(),
        Box::new(classifier.clone()),
        vec!["alexa".to_string()],
        POLL,
        Vec::new(),
    )
    .unwrap();

    std::thread::sleep(POLL * 10);
    assert!(classifier.blocks().is_empty());
}

/// Unsubscribes itself on the first recognition
#[derive(Default)]
struct OneShot {
    detector: OnceLock<Weak<WakeWordDetector>>,
    this: OnceLock<Weak<OneShot>>,
    recognitions: AtomicUsize,
}

impl WakeWordObserver for OneShot {
    fn on_event(&self, event: &WakeWordEvent) {
        if !matches!(event, WakeWordEvent::Recognized { .. }) {
            return;
        }
        self.recognitions.fetch_add(1, Ordering::SeqCst);

        let detector = self.detector.get().and_then(Weak::upgrade);
        let this = self.this.get().and_then(Weak::upgrade);
        if let (Some(detector), Some(this)) = (detector, this) {
            let this: Arc<dyn WakeWordObserver> = this;
            assert!(detector.remove_observer(&this));
        }
    }
}

#[test]
fn test_observer_can_unsubscribe_inside_callback() {
    let stream = BoundedStream::<i16>::new(1024);
    let writer = stream.create_writer().unwrap();
    let classifier = ScriptedClassifier::new([MatchResult::Match(1), MatchResult::Match(1)]);
    let recorder = Arc::new(RecordingObserver::default());

    let detector = Arc::new(
        WakeWordDetector::spawn(
            stream.create_reader(),
            Box::new(classifier.clone()),
            vec!["alexa".to_string()],
            POLL,
            vec![recorder.clone()],
        )
        .unwrap(),
    );

    let one_shot = Arc::new(OneShot::default());
    one_shot.detector.set(Arc::downgrade(&detector)).unwrap();
    one_shot.this.set(Arc::downgrade(&one_shot)).unwrap();
    detector.add_observer(one_shot.clone());

    writer.write(&[1; 8]);
    assert!(wait_until(WAIT, || recognized(&recorder.events()).len() == 1));
    writer.write(&[2; 8]);
    assert!(wait_until(WAIT, || recognized(&recorder.events()).len() == 2));

    assert_eq!(one_shot.recognitions.load(Ordering::SeqCst), 1);
}

#[test]
fn test_late_subscriber_queries_state() {
    let stream = BoundedStream::<i16>::new(1024);
    let detector = WakeWordDetector::spawn(
        stream.create_reader(),
        Box::new(ScriptedClassifier::default()),
        vec!["alexa".to_string()],
        POLL,
        Vec::new(),
    )
    .unwrap();

    assert!(wait_until(WAIT, || detector.state() == DetectorState::Active));

    let recorder = Arc::new(RecordingObserver::default());
    detector.add_observer(recorder.clone());
    std::thread::sleep(POLL * 4);
    assert!(lifecycle(&recorder.events()).is_empty());
}

#[test]
fn test_energy_classifier_detects_speech_burst() {
    let mut classifier = EnergyClassifier::new(SAMPLE_RATE, 0.5, 1.0);

    assert_eq!(classifier.classify(&generate_silence(0.1)), MatchResult::NoMatch);
    assert_eq!(
        classifier.classify(&generate_sine_samples(440.0, 0.5, 0.3)),
        MatchResult::NoMatch
    );
    assert_eq!(classifier.classify(&generate_silence(0.6)), MatchResult::Match(1));

    // Too short a burst never triggers
    classifier.classify(&generate_sine_samples(440.0, 0.1, 0.3));
    assert_eq!(classifier.classify(&generate_silence(0.6)), MatchResult::NoMatch);
}

#[test]
fn test_energy_classifier_drives_detector() {
    let stream = BoundedStream::<i16>::new(SAMPLE_RATE as usize * 4);
    let writer = stream.create_writer().unwrap();
    let recorder = Arc::new(RecordingObserver::default());

    let _detector = WakeWordDetector::spawn(
        stream.create_reader(),
        Box::new(EnergyClassifier::new(SAMPLE_RATE, 0.5, 1.0)),
        vec!["alexa".to_string()],
        POLL,
        vec![recorder.clone()],
    )
    .unwrap();

    writer.write(&generate_sine_samples(440.0, 0.5, 0.3));
    std::thread::sleep(POLL * 4);
    writer.write(&generate_silence(0.6));

    assert!(wait_until(WAIT, || !recognized(&recorder.events()).is_empty()));
    assert_eq!(recognized(&recorder.events())[0].0, "alexa");
}
