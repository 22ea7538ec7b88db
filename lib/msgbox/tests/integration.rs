//! End-to-end scenarios driven over real loopback sockets. Each test pairs
//! two `Engine`s in the same thread and alternates `run_loop` calls between
//! them, the way a single-process client/server demo would.

use msgbox::{ConnId, ConnInfo, Engine, EngineHandle, Event};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

#[derive(Clone, Default)]
struct Recorder(Rc<RefCell<Vec<String>>>);

impl Recorder {
    fn push(&self, name: &str) {
        self.0.borrow_mut().push(name.to_string());
    }

    fn events(&self) -> Vec<String> {
        self.0.borrow().clone()
    }
}

fn pump<F: FnMut() -> bool>(mut condition: F, rounds: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    for _ in 0..rounds {
        if condition() || Instant::now() > deadline {
            return;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn s1_udp_echo() {
    let server_log = Recorder::default();
    let client_log = Recorder::default();

    let server_recorder = server_log.clone();
    let mut server = Engine::new(move |eng: &mut EngineHandle<'_>, conn: ConnId, _info: ConnInfo, event: Event<'_>| {
        server_recorder.push(event.name());
        match event {
            Event::Message { data } => {
                let payload = data.to_vec();
                eng.send(conn, &payload).unwrap();
            }
            Event::Request { .. } => {
                eng.send(conn, b"reply string").unwrap();
            }
            _ => {}
        }
    })
    .unwrap();
    server.listen("udp://*:19001", None).unwrap();

    let client_recorder = client_log.clone();
    let mut client = Engine::new(move |eng: &mut EngineHandle<'_>, conn: ConnId, _info: ConnInfo, event: Event<'_>| {
        client_recorder.push(event.name());
        match event {
            Event::ConnectionReady => {
                eng.send(conn, b"hello msgbox!").unwrap();
            }
            Event::Message { data } => {
                assert_eq!(data, b"hello msgbox!");
                eng.get(conn, b"request string", Box::new(())).unwrap();
            }
            Event::Reply { data, .. } => {
                assert_eq!(data, b"reply string");
                eng.disconnect(conn).unwrap();
            }
            _ => {}
        }
    })
    .unwrap();
    client.connect("udp://127.0.0.1:19001", None).unwrap();

    pump(
        || {
            server.run_loop(0);
            client.run_loop(0);
            client_log.events().last().map(|e| e.as_str()) == Some("connection_closed")
        },
        500,
    );

    assert_eq!(
        client_log.events(),
        vec!["connection_ready", "message", "reply", "connection_closed"]
    );
    assert_eq!(
        server_log.events(),
        vec!["listening", "connection_ready", "message", "request", "connection_closed"]
    );
}

#[test]
fn s2_tcp_long_message() {
    let payload = vec![0x5Au8; 1024 * 1024];

    let received = Rc::new(RefCell::new(None::<Vec<u8>>));
    let received_in_handler = received.clone();
    let mut server = Engine::new(move |_eng: &mut EngineHandle<'_>, _conn: ConnId, _info: ConnInfo, event: Event<'_>| {
        if let Event::Message { data } = event {
            *received_in_handler.borrow_mut() = Some(data.to_vec());
        }
    })
    .unwrap();
    server.listen("tcp://*:19002", None).unwrap();

    let payload_for_client = payload.clone();
    let sent = Rc::new(RefCell::new(false));
    let sent_in_handler = sent.clone();
    let mut client = Engine::new(move |eng: &mut EngineHandle<'_>, conn: ConnId, _info: ConnInfo, event: Event<'_>| {
        if let Event::ConnectionReady = event {
            eng.send(conn, &payload_for_client).unwrap();
            *sent_in_handler.borrow_mut() = true;
        }
    })
    .unwrap();
    client.connect("tcp://127.0.0.1:19002", None).unwrap();

    pump(
        || {
            server.run_loop(0);
            client.run_loop(0);
            received.borrow().is_some()
        },
        2000,
    );

    assert_eq!(received.borrow().as_deref(), Some(payload.as_slice()));
}

#[test]
fn s3_multi_datagram_fan_in() {
    let messages = Rc::new(RefCell::new(Vec::<(String, std::net::SocketAddr)>::new()));
    let messages_in_handler = messages.clone();
    let mut server = Engine::new(move |_eng: &mut EngineHandle<'_>, _conn: ConnId, info: ConnInfo, event: Event<'_>| {
        if let Event::Message { data } = event {
            let text = std::str::from_utf8(data).unwrap().to_string();
            messages_in_handler.borrow_mut().push((text, info.remote_addr.unwrap()));
        }
    })
    .unwrap();
    server.listen("udp://*:19003", None).unwrap();

    let mut client_a = Engine::new(
        |_eng: &mut EngineHandle<'_>, _conn: ConnId, _info: ConnInfo, _event: Event<'_>| {},
    )
    .unwrap();
    let a = client_a.connect("udp://127.0.0.1:19003", None).unwrap();
    let mut client_b = Engine::new(
        |_eng: &mut EngineHandle<'_>, _conn: ConnId, _info: ConnInfo, _event: Event<'_>| {},
    )
    .unwrap();
    let b = client_b.connect("udp://127.0.0.1:19003", None).unwrap();

    client_a.run_loop(0);
    client_b.run_loop(0);
    client_a.send(a, b"why hello").unwrap();
    client_b.send(b, b"why hello").unwrap();

    pump(
        || {
            server.run_loop(0);
            client_a.run_loop(0);
            client_b.run_loop(0);
            messages.borrow().len() >= 2
        },
        500,
    );

    let seen = messages.borrow();
    assert_eq!(seen.len(), 2);
    assert_ne!(seen[0].1, seen[1].1);
    assert!(seen.iter().all(|(text, _)| text == "why hello"));
}

#[test]
fn s4_multi_request() {
    let client_log = Recorder::default();

    let mut server = Engine::new(move |eng: &mut EngineHandle<'_>, conn: ConnId, _info: ConnInfo, event: Event<'_>| match event {
        Event::Request { data, .. } if data == b"hi" => eng.send(conn, b"hello").unwrap(),
        Event::Request { data, .. } if data == b"bye" => eng.send(conn, b"byee").unwrap(),
        Event::Message { data } => {
            assert_eq!(data, b"do you know...");
            eng.send(conn, b"do i know...").unwrap();
        }
        _ => {}
    })
    .unwrap();
    server.listen("tcp://*:19004", None).unwrap();

    let client_recorder = client_log.clone();
    let stage = Rc::new(RefCell::new(0u32));
    let mut client = Engine::new(move |eng: &mut EngineHandle<'_>, conn: ConnId, _info: ConnInfo, event: Event<'_>| {
        client_recorder.push(event.name());
        match event {
            Event::ConnectionReady => {
                eng.get(conn, b"hi", Box::new(())).unwrap();
            }
            Event::Reply { data, .. } if *stage.borrow() == 0 => {
                assert_eq!(data, b"hello");
                *stage.borrow_mut() = 1;
                eng.send(conn, b"do you know...").unwrap();
                eng.get(conn, b"bye", Box::new(())).unwrap();
            }
            Event::Reply { data, .. } => {
                assert_eq!(data, b"byee");
                eng.disconnect(conn).unwrap();
            }
            Event::Message { data } => {
                assert_eq!(data, b"do i know...");
            }
            _ => {}
        }
    })
    .unwrap();
    client.connect("tcp://127.0.0.1:19004", None).unwrap();

    pump(
        || {
            server.run_loop(0);
            client.run_loop(0);
            client_log.events().last().map(|e| e.as_str()) == Some("connection_closed")
        },
        1000,
    );

    assert_eq!(
        client_log.events(),
        vec!["connection_ready", "reply", "message", "reply", "connection_closed"]
    );
}

#[test]
fn s5_connect_refused() {
    let log = Recorder::default();
    let recorder = log.clone();
    let mut client = Engine::new(move |_eng: &mut EngineHandle<'_>, _conn: ConnId, _info: ConnInfo, event: Event<'_>| {
        if let Event::Error(kind) = &event {
            assert!(kind.message().starts_with("connect:"));
        }
        recorder.push(event.name());
    })
    .unwrap();
    client.connect("tcp://127.0.0.1:19599", None).unwrap();

    pump(
        || {
            client.run_loop(0);
            !log.events().is_empty()
        },
        500,
    );

    assert_eq!(log.events(), vec!["error"]);
}

#[test]
fn s6_bad_address_never_creates_a_socket() {
    let mut client = Engine::new(
        |_eng: &mut EngineHandle<'_>, _conn: ConnId, _info: ConnInfo, _event: Event<'_>| {},
    )
    .unwrap();
    let result = client.connect("ftp://x:1", None);
    assert!(result.is_err());
    assert_eq!(client.connection_count(), 0);
}
