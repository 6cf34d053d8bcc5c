/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::collections::HashSet;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use framecast::VERSION;
use framecast::broadcast::{BroadcastSummary, MailboxTransport, TransportError, broadcast};
use framecast::context::{ContextGraph, ContextTree, Layout, LiveContextTree, NodeKey};
use framecast::hierarchy::{locate, resolve};
use framecast::page::Location;
use framecast::report::{
    EventContext, Outbound, OutboundError, ReportError, Reporter, ReporterConfig,
};
use framecast::session::{Report, Session};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::{Value, json};
use url::Url;
use uuid::Uuid;

#[test]
fn scenarios_binary_smoke_runs() {
    assert!(!VERSION.is_empty());
}

/// Primary window with two frames (the second embedding another frame) and a
/// popup opened from the first frame, which itself embeds a frame.
fn login_session() -> ContextTree {
    ContextTree::from_layout(
        &Layout::new("https://rp.test/")
            .with_frame(
                Layout::new("https://rp.test/widget").with_popup(
                    Layout::new("https://idp.test/auth").with_frame(Layout::new("https://idp.test/captcha")),
                ),
            )
            .with_frame(Layout::new("https://ads.test/").with_frame(Layout::new("https://ads.test/inner"))),
    )
}

fn delivering<'a>(log: &'a Mutex<Vec<NodeKey>>) -> impl Fn(NodeKey, &str) -> Result<(), TransportError> + 'a {
    move |target, _message| {
        log.lock().push(target);
        Ok(())
    }
}

fn assert_exactly_once(summary: &BroadcastSummary<NodeKey>, expected: &HashSet<NodeKey>) {
    let delivered: HashSet<_> = summary.delivered.iter().copied().collect();
    assert_eq!(delivered.len(), summary.delivered.len(), "duplicate delivery");
    assert_eq!(&delivered, expected);
}

#[test]
fn every_reachable_context_gets_a_rooted_address_of_its_depth() {
    let tree = login_session();
    for (key, _) in tree.nodes() {
        let address = resolve(&tree, key);
        assert!(address.is_rooted(), "{address} is not rooted");

        let mut hops = 0;
        let mut current = key;
        while let Some(next) = tree.parent(current).or_else(|| tree.opener(current)) {
            hops += 1;
            current = next;
        }
        assert_eq!(address.depth(), hops);
        assert_eq!(address.segments().len(), hops + 1);
        assert_eq!(locate(&tree, tree.primary(), &address), Some(key));
    }
}

#[test]
fn popup_of_first_frame_resolves_through_the_frame() {
    let tree = login_session();
    let widget = tree.frame_at(tree.primary(), 0).unwrap();
    let auth = tree.popup_at(widget, 0).unwrap();
    let captcha = tree.frame_at(auth, 0).unwrap();

    assert_eq!(resolve(&tree, auth).to_string(), "Top.Frame(0).Popup(0)");
    assert_eq!(resolve(&tree, captcha).to_string(), "Top.Frame(0).Popup(0).Frame(0)");
}

#[test]
fn lone_primary_window_receives_only_its_own_message() {
    let tree = ContextTree::new("https://rp.test/");
    let log = Mutex::new(Vec::new());
    let summary = broadcast(&tree, &delivering(&log), tree.primary(), "ping");

    assert_eq!(summary.delivered, vec![tree.primary()]);
    assert_eq!(*log.lock(), vec![tree.primary()]);
    assert_eq!(summary.skipped_closed, 0);
}

#[test]
fn broadcast_from_a_leaf_frame_reaches_the_whole_session() {
    let tree = login_session();
    let ads = tree.frame_at(tree.primary(), 1).unwrap();
    let inner = tree.frame_at(ads, 0).unwrap();
    let everything: HashSet<_> = tree.nodes().map(|(key, _)| key).collect();

    let log = Mutex::new(Vec::new());
    let summary = broadcast(&tree, &delivering(&log), inner, "ping");

    assert_eq!(summary.delivered[0], inner);
    assert_exactly_once(&summary, &everything);
    assert_eq!(*log.lock(), summary.delivered);
}

#[test]
fn windows_linked_only_by_opener_reach_each_other_from_either_side() {
    let tree = ContextTree::from_layout(
        &Layout::new("https://a.test/")
            .with_frame(Layout::new("https://a.test/frame"))
            .with_popup(Layout::new("https://b.test/").with_frame(Layout::new("https://b.test/frame"))),
    );
    let everything: HashSet<_> = tree.nodes().map(|(key, _)| key).collect();
    let popup = tree.popup_at(tree.primary(), 0).unwrap();
    let popup_frame = tree.frame_at(popup, 0).unwrap();
    let primary_frame = tree.frame_at(tree.primary(), 0).unwrap();

    for origin in [tree.primary(), popup, popup_frame, primary_frame] {
        let log = Mutex::new(Vec::new());
        let summary = broadcast(&tree, &delivering(&log), origin, "ping");
        assert_eq!(summary.delivered[0], origin);
        assert_exactly_once(&summary, &everything);
    }
}

#[test]
fn closed_popups_are_skipped_but_later_popups_are_not() {
    let tree = ContextTree::from_layout(
        &Layout::new("https://a.test/")
            .with_popup(Layout::new("https://closed.test/").closed())
            .with_popup(Layout::new("https://open.test/").with_frame(Layout::new("https://open.test/f"))),
    );
    let closed = tree.popup_at(tree.primary(), 0).unwrap();
    let open = tree.popup_at(tree.primary(), 1).unwrap();
    let open_frame = tree.frame_at(open, 0).unwrap();

    let log = Mutex::new(Vec::new());
    let summary = broadcast(&tree, &delivering(&log), tree.primary(), "ping");

    assert!(!summary.delivered.contains(&closed));
    assert_eq!(summary.skipped_closed, 1);
    assert_exactly_once(&summary, &HashSet::from([tree.primary(), open, open_frame]));
}

#[test]
fn popup_of_a_closed_popup_still_reaches_the_top_window() {
    let mut tree = ContextTree::default();
    let top = tree.primary();
    let p = tree.open_popup(top, "https://p.test/").unwrap();
    let q = tree.open_popup(p, "https://q.test/").unwrap();
    tree.close(p);

    let log = Mutex::new(Vec::new());
    let summary = broadcast(&tree, &delivering(&log), q, "ping");

    assert_eq!(summary.delivered, vec![q, top]);
    assert_eq!(summary.skipped_closed, 1);
}

#[test]
fn detaching_frames_during_delivery_does_not_panic() {
    let live: LiveContextTree = Arc::new(RwLock::new(login_session()));
    let (primary, ads) = {
        let tree = live.read();
        (tree.primary(), tree.frame_at(tree.primary(), 1).unwrap())
    };

    let writer = Arc::clone(&live);
    let transport = move |target: NodeKey, _message: &str| -> Result<(), TransportError> {
        if target == primary {
            let mut tree = writer.write();
            assert!(tree.detach_frame(ads));
            let frames: Vec<_> = (0..tree.frame_count(primary))
                .filter_map(|i| tree.frame_at(primary, i))
                .collect();
            tree.reorder_frames(primary, &frames);
        }
        Ok(())
    };

    let summary = broadcast(&*live, &transport, primary, "ping");

    assert_eq!(summary.delivered[0], primary);
    let tree = live.read();
    assert!(!tree.contains(ads));
    let remaining: HashSet<_> = tree.nodes().map(|(key, _)| key).collect();
    let delivered: HashSet<_> = summary.delivered.iter().copied().collect();
    assert_eq!(delivered, remaining);
}

#[test]
fn reordering_frames_during_delivery_keeps_delivery_unique() {
    let live: LiveContextTree = Arc::new(RwLock::new(ContextTree::from_layout(
        &Layout::new("https://a.test/")
            .with_frame(Layout::new("https://f0.test/"))
            .with_frame(Layout::new("https://f1.test/"))
            .with_frame(Layout::new("https://f2.test/")),
    )));
    let primary = live.read().primary();

    let writer = Arc::clone(&live);
    let transport = move |_target: NodeKey, _message: &str| -> Result<(), TransportError> {
        let mut tree = writer.write();
        let mut frames: Vec<_> = (0..tree.frame_count(primary))
            .filter_map(|i| tree.frame_at(primary, i))
            .collect();
        frames.rotate_left(1);
        tree.reorder_frames(primary, &frames);
        Ok(())
    };

    let summary = broadcast(&*live, &transport, primary, "ping");
    let delivered: HashSet<_> = summary.delivered.iter().copied().collect();
    assert_eq!(delivered.len(), summary.delivered.len());
    assert!(delivered.contains(&primary));
}

#[test]
fn mailbox_transport_delivers_to_registered_contexts() {
    let tree = login_session();
    let mailboxes = MailboxTransport::<NodeKey, String>::new();
    let widget = tree.frame_at(tree.primary(), 0).unwrap();
    let inbox = mailboxes.register(widget);

    let summary = broadcast(&tree, &mailboxes, tree.primary(), &"hello".to_owned());

    assert_eq!(summary.delivered, vec![widget]);
    assert_eq!(summary.failed.len(), tree.node_count() - 1);
    assert!(
        summary
            .failed
            .iter()
            .all(|(_, err)| *err == TransportError::Unreachable)
    );
    assert_eq!(inbox.try_recv().unwrap(), "hello");
}

/// Collector double recording every request.
struct RecordingCollector {
    answer: String,
    config_fetches: Mutex<usize>,
    posts: Mutex<Vec<Value>>,
}

impl RecordingCollector {
    fn new(answer: Value) -> Arc<Self> {
        Arc::new(Self {
            answer: answer.to_string(),
            config_fetches: Mutex::new(0),
            posts: Mutex::new(Vec::new()),
        })
    }
}

impl Outbound for RecordingCollector {
    fn fetch_text(&self, _url: &Url) -> Result<String, OutboundError> {
        *self.config_fetches.lock() += 1;
        Ok(json!({"core_endpoint": "http://core.test", "handler_uuid": Uuid::nil()}).to_string())
    }

    fn post_json(&self, _url: &Url, body: String) -> Result<String, OutboundError> {
        self.posts
            .lock()
            .push(serde_json::from_str(&body).map_err(|e| OutboundError::Body(e.to_string()))?);
        Ok(self.answer.clone())
    }
}

fn event_in_popup() -> EventContext {
    let tree = login_session();
    let widget = tree.frame_at(tree.primary(), 0).unwrap();
    let auth = tree.popup_at(widget, 0).unwrap();
    EventContext::for_context(&tree, auth, "https://idp.test/auth?client_id=rp#nonce=n1").unwrap()
}

fn config_url() -> Url {
    Url::parse("https://ext.test/config/config.json").unwrap()
}

#[test]
fn acknowledged_report_resolves_and_carries_context() {
    let collector = RecordingCollector::new(json!({"success": true}));
    let reporter = Reporter::with_outbound(config_url(), collector.clone());

    reporter
        .report(&event_in_popup(), "documentinit", &json!({"hierarchy": "Top", "extra": 1}))
        .unwrap();

    let posts = collector.posts.lock();
    let val = &posts[0]["report"]["val"];
    assert_eq!(posts[0]["report"]["key"], "documentinit");
    assert_eq!(val["hierarchy"], "Top.Frame(0).Popup(0)");
    assert_eq!(val["href"], "https://idp.test/auth?client_id=rp#nonce=n1");
    assert_eq!(val["hrefparts"]["query"], json!({"client_id": "rp"}));
    assert_eq!(val["hrefparts"]["hash"], json!({"nonce": "n1"}));
    assert_eq!(val["extra"], 1);
    assert!(val["timestamp"].is_u64());
}

#[test]
fn unacknowledged_report_is_rejected_by_the_server() {
    let collector = RecordingCollector::new(json!({"success": false}));
    let reporter = Reporter::with_outbound(config_url(), collector.clone());
    let err = reporter
        .report(&event_in_popup(), "windowopen", &json!({}))
        .unwrap_err();
    assert!(matches!(err, ReportError::ServerRejection(_)));
}

#[test]
fn unserializable_report_fails_before_any_request() {
    struct Broken;
    impl Serialize for Broken {
        fn serialize<S: serde::Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("not representable"))
        }
    }

    let collector = RecordingCollector::new(json!({"success": true}));
    let reporter = Reporter::with_outbound(config_url(), collector.clone());
    let err = reporter.report(&event_in_popup(), "x", &Broken).unwrap_err();

    assert!(matches!(err, ReportError::Serialization(_)));
    assert_eq!(*collector.config_fetches.lock(), 0);
    assert!(collector.posts.lock().is_empty());
}

#[test]
fn collector_config_loads_once_across_detached_reports() {
    let collector = RecordingCollector::new(json!({"success": true}));
    let reporter = Arc::new(Reporter::with_outbound(config_url(), collector.clone()));

    reporter.report(&event_in_popup(), "documentinit", &json!({})).unwrap();
    let handles: Vec<_> = (0..4)
        .map(|n| reporter.report_detached(&event_in_popup(), "postmessagereceived", &json!({"n": n})))
        .collect();
    for handle in handles {
        assert_eq!(handle.wait(), Ok(()));
    }

    assert_eq!(*collector.config_fetches.lock(), 1);
    assert_eq!(collector.posts.lock().len(), 5);
}

/// One-connection HTTP server answering with `status` and `answer`; yields the
/// request line and body it received.
fn serve_once(status: &'static str, answer: &'static str) -> (Url, JoinHandle<(String, String)>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let base = Url::parse(&format!("http://{}", listener.local_addr().unwrap())).unwrap();
    let handle = std::thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream);
        let mut request_line = String::new();
        reader.read_line(&mut request_line).unwrap();
        let mut content_length = 0;
        loop {
            let mut header = String::new();
            reader.read_line(&mut header).unwrap();
            let header = header.trim_end();
            if header.is_empty() {
                break;
            }
            if let Some((name, value)) = header.split_once(':') {
                if name.eq_ignore_ascii_case("content-length") {
                    content_length = value.trim().parse().unwrap();
                }
            }
        }
        let mut body = vec![0; content_length];
        reader.read_exact(&mut body).unwrap();

        let mut stream = reader.into_inner();
        write!(
            stream,
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{answer}",
            answer.len()
        )
        .unwrap();
        stream.flush().unwrap();
        (request_line.trim_end().to_owned(), String::from_utf8(body).unwrap())
    });
    (base, handle)
}

#[test]
fn report_round_trip_over_http_with_file_config() {
    let (base, server) = serve_once("200 OK", r#"{"success": true}"#);
    let handler = Uuid::new_v4();
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("config.json");
    let config = ReporterConfig {
        core_endpoint: base.as_str().to_owned(),
        handler_uuid: handler,
    };
    std::fs::write(&config_path, serde_json::to_string(&config).unwrap()).unwrap();

    let reporter = Reporter::new(Url::from_file_path(&config_path).unwrap()).unwrap();
    let context = EventContext::new(
        "Top.Frame(1)".parse().unwrap(),
        Location::parse("https://rp.test/").unwrap(),
    );
    reporter.report(&context, "formsubmit", &json!({"user": "alice"})).unwrap();

    let (request_line, body) = server.join().unwrap();
    assert_eq!(
        request_line,
        format!("POST /api/handlers/{handler}/dispatch HTTP/1.1")
    );
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["report"]["val"]["hierarchy"], "Top.Frame(1)");
    assert_eq!(body["report"]["val"]["user"], "alice");
}

#[test]
fn refusal_sent_with_error_status_is_a_server_rejection() {
    let (base, server) = serve_once("404 Not Found", r#"{"success": false, "error": "unknown handler"}"#);
    let config = ReporterConfig {
        core_endpoint: base.as_str().to_owned(),
        handler_uuid: Uuid::new_v4(),
    };
    let outbound = Arc::new(framecast::report::HttpOutbound::new(Duration::from_secs(4)).unwrap());
    let reporter = Reporter::preconfigured(config, outbound);

    let err = reporter
        .report(&event_in_popup(), "documentinit", &json!({}))
        .unwrap_err();
    server.join().unwrap();

    assert_eq!(err, ReportError::ServerRejection("unknown handler".to_owned()));
    assert!(err.reached_collector());
}

#[test]
fn stalled_collector_times_out_as_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let config = ReporterConfig {
        core_endpoint: base,
        handler_uuid: Uuid::nil(),
    };
    let outbound = Arc::new(
        framecast::report::HttpOutbound::new(Duration::from_millis(200)).unwrap(),
    );
    let reporter = Reporter::preconfigured(config, outbound);

    let err = reporter
        .report(&event_in_popup(), "x", &json!({}))
        .unwrap_err();
    assert!(matches!(err, ReportError::Transport(_)));
    drop(listener);
}

#[test]
fn collector_session_mirrors_reported_contexts() {
    let tree = login_session();
    let mut session = Session::new();

    // Reports may arrive in any order; the deepest one first.
    let mut keys: Vec<_> = tree.nodes().map(|(key, _)| key).collect();
    keys.sort_by_key(|key| std::cmp::Reverse(resolve(&tree, *key).depth()));
    for key in keys {
        let node = tree.get(key).unwrap();
        let body = json!({
            "report": {
                "key": "documentinit",
                "val": {"hierarchy": resolve(&tree, key).to_string(), "href": node.url},
            }
        });
        let report = Report::from_request_body(&body.to_string()).unwrap();
        session.apply(report).unwrap();
    }

    assert_eq!(session.len(), tree.node_count());
    assert_eq!(
        session.dump(),
        "top\n\t-> frames[0]\n\t\t-> popups[0]\n\t\t\t-> frames[0]\n\t-> frames[1]\n\t\t-> frames[0]"
    );
    for (key, node) in tree.nodes() {
        let entry = session.get(&resolve(&tree, key)).unwrap();
        assert_eq!(entry.href.as_deref(), Some(node.url.as_str()));
    }
}
