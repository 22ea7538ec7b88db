//! A server that repeats back every message and request it receives,
//! prefixed with `echo:`.
//!
//! Run as either:
//!   echo_server tcp
//!   echo_server udp

use clap::{App, Arg};
use msgbox::{ConnId, ConnInfo, Engine, EngineHandle, Event};
use std::cell::Cell;
use std::process;
use std::rc::Rc;

fn main() {
    let matches = App::new("echo_server")
        .about("Repeats back whatever it's sent, over tcp or udp")
        .arg(Arg::with_name("PROTOCOL").help("tcp or udp").required(true))
        .get_matches();

    let protocol = matches.value_of("PROTOCOL").unwrap();
    let port = match protocol {
        "tcp" => 2345,
        "udp" => 2468,
        other => {
            eprintln!("unknown protocol {:?}, expected tcp or udp", other);
            process::exit(2);
        }
    };

    let address = format!("{}://*:{}", protocol, port);
    println!("Server: listening at address {}", address);

    let done = Rc::new(Cell::new(false));
    let done_in_handler = done.clone();

    let handler = move |eng: &mut EngineHandle<'_>, conn: ConnId, _info: ConnInfo, event: Event<'_>| {
        println!("Server: received event {} on connection {}.", event.name(), conn);
        match event {
            Event::Error(kind) => println!("Server: error: {}.", kind.message()),
            Event::Message { data } | Event::Request { data, .. } => {
                let text = std::str::from_utf8(data).unwrap_or("<binary>");
                println!("Server: message is '{}'.", text);
                let reply = format!("echo:{}", text);
                if let Err(err) = eng.send(conn, reply.as_bytes()) {
                    println!("Server: send failed: {:?}", err);
                }
            }
            Event::ConnectionClosed => done_in_handler.set(true),
            _ => {}
        }
    };

    let mut engine = Engine::new(handler).expect("failed to build reactor");
    let listener = engine.listen(&address, None).expect("listen failed");

    while !done.get() {
        engine.run_loop(10);
    }

    engine.unlisten(listener).expect("unlisten failed");
    // Give the loop one more pass to see the listening_ended event.
    engine.run_loop(10);
}
