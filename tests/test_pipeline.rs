use flate2::Compression;
use flate2::write::GzEncoder;
use session_sieve::input;
use session_sieve::{
    Filter, FieldRequest, HookSet, Pipeline, PipelineOptions, Session, SessionHook, Template,
    TemplateSink,
};
use std::fs;
use std::io::Write;
use std::time::Duration;
use tempfile::tempdir;

fn record(serial: u64) -> String {
    let proto = if serial % 10 == 0 { 17 } else { 6 };
    format!(
        "session info: proto={} proto_state=01 duration=5 expire=55 timeout=3600 flags=00000000\n\
         statistic(bytes/packets/allow_err): org={}/2/1 reply=80/1/1 tuples=2\n\
         hook=pre dir=org act=noop 10.0.{}.{}:{}->192.0.2.1:443(0.0.0.0:0)\n\
         serial={:08x} tos=ff/ff app_list=0 app=0 url_cat=0\n",
        proto,
        serial * 3,
        (serial / 250) % 256,
        serial % 250,
        1024 + serial % 60000,
        serial
    )
}

fn dump(count: u64) -> String {
    let mut text = String::from("get system session list\n");
    for serial in 0..count {
        text.push_str(&record(serial));
    }
    text.push_str(&format!("total session {}\n", count));
    text
}

fn options(threads: usize) -> PipelineOptions {
    PipelineOptions {
        threads,
        high_water_mark: 512,
        push_batch: 64,
        pop_batch: 16,
        idle_sleep: Duration::from_millis(1),
        ..PipelineOptions::default()
    }
}

fn sorted_serials(sessions: &[Session]) -> Vec<u64> {
    let mut serials: Vec<u64> = sessions.iter().map(|s| s.serial).collect();
    serials.sort_unstable();
    serials
}

#[test]
fn test_every_record_comes_out_once() {
    let pipeline = Pipeline::new(options(3), FieldRequest::new(), None, HookSet::new());
    let mut out = Vec::new();
    let report = pipeline.run(dump(10_000).as_bytes(), &mut out).unwrap();

    assert_eq!(report.read, 10_000);
    assert_eq!(report.emitted, 10_000);
    assert_eq!(sorted_serials(&out), (0..10_000).collect::<Vec<_>>());
}

#[test]
fn test_filter_selects_subset() {
    let mut request = FieldRequest::new();
    let filter = Filter::compile("proto udp", &mut request).unwrap();
    let pipeline = Pipeline::new(options(3), request, Some(filter), HookSet::new());

    let mut out = Vec::new();
    let report = pipeline.run(dump(10_000).as_bytes(), &mut out).unwrap();

    assert_eq!(report.emitted, 1000);
    assert_eq!(report.filtered_out, 9000);
    assert_eq!(
        sorted_serials(&out),
        (0..10_000).step_by(10).collect::<Vec<_>>()
    );
}

#[test]
fn test_filter_on_counters_and_addresses() {
    let mut request = FieldRequest::new();
    let filter = Filter::compile("shost in 10.0.0.0/24 and count[ob] >= 300", &mut request).unwrap();
    let pipeline = Pipeline::new(options(2), request, Some(filter), HookSet::new());

    let mut out = Vec::new();
    pipeline.run(dump(1000).as_bytes(), &mut out).unwrap();

    // 10.0.0.x holds serials 0..250, bytes are serial * 3
    assert_eq!(sorted_serials(&out), (100..250).collect::<Vec<_>>());
}

struct Flaky;

impl SessionHook for Flaky {
    fn name(&self) -> &str {
        "flaky"
    }

    fn before_filter(&self, session: &mut Session) -> bool {
        if session.serial == 77 {
            panic!("cannot handle session 77");
        }
        false
    }
}

#[test]
fn test_panicking_hook_skips_one_session() {
    let mut hooks = HookSet::new();
    hooks.push(Box::new(Flaky));
    let pipeline = Pipeline::new(options(3), FieldRequest::new(), None, hooks);

    let mut out = Vec::new();
    let report = pipeline.run(dump(500).as_bytes(), &mut out).unwrap();

    assert_eq!(report.faulted, 1);
    assert_eq!(report.emitted, 499);
    assert!(!sorted_serials(&out).contains(&77));
}

#[test]
fn test_gzip_input_through_template() {
    let dir = tempdir().expect("temp dir");
    let path = dir.path().join("sessions.txt.gz");

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(dump(300).as_bytes()).unwrap();
    fs::write(&path, encoder.finish().unwrap()).unwrap();

    let mut request = FieldRequest::new();
    let template = Template::compile("${serial:d} ${proto:s}", &mut request).unwrap();
    let filter = Filter::compile("proto udp", &mut request).unwrap();
    let pipeline = Pipeline::new(options(2), request, Some(filter), HookSet::new());

    let mut input = input::open(path.to_str().unwrap(), true, false).unwrap();
    let mut sink = TemplateSink::new(template, Vec::new(), true);
    let report = pipeline.run(&mut input, &mut sink).unwrap();
    input.finish();

    assert_eq!(report.read, 300);
    let text = String::from_utf8(sink.into_inner().unwrap()).unwrap();
    let mut lines: Vec<&str> = text.lines().collect();
    lines.sort_unstable();
    assert_eq!(lines.len(), 30);
    assert!(lines.contains(&"0 UDP"));
    assert!(lines.contains(&"290 UDP"));
    assert!(lines.iter().all(|line| line.ends_with(" UDP")));
}

#[test]
fn test_oversized_record_is_an_input_error() {
    // no record boundary within the first read chunk
    let mut text = dump(3);
    text.insert_str(text.find("serial=").unwrap(), &"x".repeat(100_000));
    let pipeline = Pipeline::new(
        PipelineOptions {
            max_record_bytes: 1024,
            ..options(2)
        },
        FieldRequest::new(),
        None,
        HookSet::new(),
    );

    let mut out = Vec::new();
    let err = pipeline.run(text.as_bytes(), &mut out).unwrap_err();
    assert!(matches!(err, session_sieve::PipelineError::Input(_)));
}
