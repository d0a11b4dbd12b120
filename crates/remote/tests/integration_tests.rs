//! Integration tests for the remote crate
//!
//! These tests drive full snapshot/replay cycles against the in-memory
//! document, with either a scripted transport or a local HTTP stub.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;

use remote::dates::{iso_to_serial, serial_to_iso};
use remote::models::{Action, Cell, WorkbookSnapshot};
use remote::transport::{RequestHeaders, Transport};
use remote::{
    AlertDialog, DialogService, DialogSize, Dispatcher, HttpTransport, MemoryDocument, RemoteError,
    Result, RunOptions, Runner,
};

/// Transport that answers with a fixed action list and counts calls
#[derive(Default)]
struct ScriptedTransport {
    calls: AtomicUsize,
    reply: Vec<Action>,
    sent: Mutex<Option<WorkbookSnapshot>>,
}

impl ScriptedTransport {
    fn replying(reply: Vec<Action>) -> Self {
        Self {
            reply,
            ..Default::default()
        }
    }
}

impl Transport for ScriptedTransport {
    fn exchange(
        &self,
        _url: &str,
        _headers: &RequestHeaders,
        snapshot: &WorkbookSnapshot,
    ) -> Result<Vec<Action>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.sent.lock().unwrap() = Some(snapshot.clone());
        Ok(self.reply.clone())
    }
}

#[derive(Clone, Default)]
struct RecordingDialog {
    urls: Arc<Mutex<Vec<String>>>,
}

impl DialogService for RecordingDialog {
    fn display(&self, url: &str, _size: DialogSize) -> Result<()> {
        self.urls.lock().unwrap().push(url.to_string());
        Ok(())
    }

    fn close(&self) {}
}

/// Serve one HTTP request, then hand back the raw request head and body
fn serve_once(status: &'static str, body: &'static str) -> (String, mpsc::Receiver<(String, String)>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}/xlwings/custom-functions-call", listener.local_addr().unwrap());
    let (tx, rx) = mpsc::channel();

    thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());

        let mut head = String::new();
        let mut content_length = 0;
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            if line == "\r\n" || line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':')
                && name.eq_ignore_ascii_case("content-length")
            {
                content_length = value.trim().parse().unwrap();
            }
            head.push_str(&line);
        }
        let mut request_body = vec![0; content_length];
        reader.read_exact(&mut request_body).unwrap();

        let mut stream = stream;
        write!(
            stream,
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        )
        .unwrap();
        stream.flush().unwrap();
        tx.send((head, String::from_utf8(request_body).unwrap())).unwrap();
    });

    (url, rx)
}

fn three_sheets() -> MemoryDocument {
    MemoryDocument::from_json(
        r#"{
            "name": "Book1.xlsx",
            "sheets": [
                { "name": "A", "values": [["a"]] },
                {
                    "name": "B",
                    "values": [["b", 1]],
                    "tables": [{ "name": "Hidden", "range": "A1:B1" }]
                },
                { "name": "C", "values": [["c"]] }
            ]
        }"#,
    )
    .unwrap()
}

#[test]
fn test_serial_date_round_trip() {
    assert_eq!(serial_to_iso(44562.0).as_deref(), Some("2022-01-01T00:00:00.000Z"));
    assert_eq!(iso_to_serial("2022-01-01T00:00:00.000Z"), Some(44562.0));
    assert_eq!(serial_to_iso(25569.0).as_deref(), Some("1970-01-01T00:00:00.000Z"));
}

#[test]
fn test_include_and_exclude_never_reach_transport() {
    let transport = ScriptedTransport::default();
    let runner = Runner::new("http://engine", &transport, Dispatcher::default());
    let mut doc = three_sheets();

    let options = RunOptions::new().include(["A"]).exclude(["B"]);
    let err = runner.run(&mut doc, &options).unwrap_err();

    assert!(matches!(err, RemoteError::Configuration(_)));
    assert_eq!(err.to_string(), "Either use 'include' or 'exclude', but not both!");
    assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_excluded_sheet_keeps_its_slot() {
    let transport = ScriptedTransport::default();
    let runner = Runner::new("http://engine", &transport, Dispatcher::default());
    let mut doc = three_sheets();

    runner
        .run(&mut doc, &RunOptions::new().exclude(["B"]))
        .unwrap();

    let sent = transport.sent.lock().unwrap().clone().unwrap();
    assert_eq!(sent.sheets.len(), 3);
    assert_eq!(sent.sheets[1].name, "B");
    assert_eq!(sent.sheets[1].values, vec![Vec::<Cell>::new()]);
    assert!(sent.sheets[1].tables.is_empty());
    assert_eq!(sent.sheets[2].values, vec![vec![Cell::from("c")]]);
}

#[test]
fn test_set_values_on_blank_sheet() {
    let transport = ScriptedTransport::replying(vec![
        Action::new("setValues")
            .sheet(0)
            .range(0, 0, 1, 1)
            .values(vec![vec![Cell::Number(5.0)]]),
    ]);
    let runner = Runner::new("http://engine", &transport, Dispatcher::default());
    let mut doc = MemoryDocument::with_sheets("Book1", &["Sheet1"]);

    runner.run(&mut doc, &RunOptions::new()).unwrap();
    assert_eq!(doc.value(0, 0, 0), Cell::Number(5.0));
}

#[test]
fn test_add_then_rename_sees_new_sheet() {
    let transport = ScriptedTransport::replying(vec![
        Action::new("addSheet").args([Cell::Number(0.0), Cell::from("New")]),
        Action::new("setSheetName").sheet(0).args(["Renamed"]),
    ]);
    let runner = Runner::new("http://engine", &transport, Dispatcher::default());
    let mut doc = MemoryDocument::with_sheets("Book1", &["Sheet1"]);

    let stats = runner.run(&mut doc, &RunOptions::new()).unwrap();
    assert_eq!(doc.sheet_names(), vec!["Renamed", "Sheet1"]);
    assert_eq!(stats.barriers, 1);
    assert_eq!(stats.actions_applied, 2);
}

#[test]
fn test_unknown_action_aborts_replay() {
    let transport = ScriptedTransport::replying(vec![
        Action::new("setValues")
            .sheet(0)
            .range(0, 0, 1, 1)
            .values(vec![vec![Cell::from("first")]]),
        Action::new("frobnicate"),
        Action::new("setValues")
            .sheet(0)
            .range(1, 0, 1, 1)
            .values(vec![vec![Cell::from("never")]]),
    ]);
    let runner = Runner::new("http://engine", &transport, Dispatcher::default());
    let mut doc = MemoryDocument::with_sheets("Book1", &["Sheet1"]);

    let err = runner.run(&mut doc, &RunOptions::new()).unwrap_err();
    assert!(matches!(err, RemoteError::UnknownAction(ref f) if f == "frobnicate"));
    assert_eq!(doc.value(0, 1, 0), Cell::Empty);
}

#[test]
fn test_http_round_trip() {
    let (url, requests) = serve_once(
        "200 OK",
        r#"{"actions":[{"func":"setValues","args":[],"values":[["2024-03-01T00:00:00.000Z"]],"sheet_position":0,"start_row":0,"start_column":0,"row_count":1,"column_count":1}]}"#,
    );
    let runner = Runner::new(url, HttpTransport::new(), Dispatcher::default());
    let mut doc = MemoryDocument::with_sheets("Book1", &["Sheet1"]);

    runner
        .run(&mut doc, &RunOptions::new().auth("Token abc").header("X-Trace", "7"))
        .unwrap();

    let (head, body) = requests.recv().unwrap();
    let head = head.to_ascii_lowercase();
    assert!(head.starts_with("post /xlwings/custom-functions-call"));
    assert!(head.contains("authorization: token abc"));
    assert!(head.contains("content-type: application/json"));
    assert!(head.contains("x-trace: 7"));

    let snapshot: WorkbookSnapshot = serde_json::from_str(&body).unwrap();
    assert_eq!(snapshot.client, "relay");
    assert_eq!(snapshot.sheets[0].name, "Sheet1");

    assert_eq!(doc.value(0, 0, 0), Cell::Number(45352.0));
    assert_eq!(doc.number_format(0, 0, 0).as_deref(), Some("yyyy-mm-dd"));
}

#[test]
fn test_http_error_body_becomes_alert() {
    let (url, _requests) = serve_once("500 Internal Server Error", "KeyError: 'Sheet9'");
    let dialog = RecordingDialog::default();
    let dispatcher = Dispatcher::default().with_alerts(AlertDialog::new(dialog.clone(), "https://engine"));
    let runner = Runner::new(url, HttpTransport::new(), dispatcher);
    let mut doc = MemoryDocument::with_sheets("Book1", &["Sheet1"]);

    let err = runner.run_or_alert(&mut doc, &RunOptions::new()).unwrap_err();
    assert!(matches!(err, RemoteError::Transport { status: 500, .. }));
    assert_eq!(err.to_string(), "KeyError: 'Sheet9'");

    let urls = dialog.urls.lock().unwrap();
    assert_eq!(urls.len(), 1);
    assert!(urls[0].starts_with("https://engine/xlwings/alert?"));
    assert!(urls[0].contains("title=Error"));
    assert!(urls[0].contains("mode=critical"));
    assert!(urls[0].contains("KeyError"));
}

#[test]
fn test_http_null_body_is_no_actions() {
    let (url, _requests) = serve_once("200 OK", "null");
    let runner = Runner::new(url, HttpTransport::new(), Dispatcher::default());
    let mut doc = MemoryDocument::with_sheets("Book1", &["Sheet1"]);

    let stats = runner.run(&mut doc, &RunOptions::new()).unwrap();
    assert_eq!(stats.actions_applied, 0);
}

#[test]
fn test_config_sheet_supplies_exclude() {
    let mut doc = MemoryDocument::from_json(
        r#"{
            "name": "Book1.xlsx",
            "sheets": [
                { "name": "Data", "values": [["x"]] },
                { "name": "xlwings.conf", "values": [["EXCLUDE", "xlwings.conf"], ["HEADER_X-Env", "test"]] }
            ]
        }"#,
    )
    .unwrap();
    let transport = ScriptedTransport::default();
    let runner = Runner::new("http://engine", &transport, Dispatcher::default());

    runner.run(&mut doc, &RunOptions::new()).unwrap();

    let sent = transport.sent.lock().unwrap().clone().unwrap();
    assert_eq!(sent.sheets[0].values, vec![vec![Cell::from("x")]]);
    assert_eq!(sent.sheets[1].values, vec![Vec::<Cell>::new()]);
}
