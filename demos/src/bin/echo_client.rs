//! Sends a one-way message, then turns the echoed reply into a request,
//! printing whatever reply context comes back.
//!
//! Meant to be run after `echo_server` has been started:
//!   echo_client tcp
//!   echo_client udp

use clap::{App, Arg};
use msgbox::{ConnId, ConnInfo, Engine, EngineHandle, Event};
use std::cell::Cell;
use std::process;
use std::rc::Rc;

fn main() {
    let matches = App::new("echo_client")
        .about("Sends a one-way message and a follow-up request to echo_server")
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

    let address = format!("{}://127.0.0.1:{}", protocol, port);
    println!("Client: connecting to address {}", address);

    let done = Rc::new(Cell::new(false));
    let done_in_handler = done.clone();

    let handler = move |eng: &mut EngineHandle<'_>, conn: ConnId, _info: ConnInfo, event: Event<'_>| {
        println!("Client: received event {} on connection {}.", event.name(), conn);
        match event {
            Event::Error(kind) => println!("Client: error: {}.", kind.message()),
            Event::ConnectionReady => {
                if let Err(err) = eng.send(conn, b"one-way message") {
                    println!("Client: send failed: {:?}", err);
                }
            }
            Event::Message { data } => {
                let text = std::str::from_utf8(data).unwrap_or("<binary>");
                println!("Client: message is '{}'.", text);
                let context: Box<dyn std::any::Any> = Box::new("reply context".to_string());
                if let Err(err) = eng.get(conn, b"request-reply message", context) {
                    println!("Client: get failed: {:?}", err);
                }
            }
            Event::Reply { data, context, .. } => {
                let text = std::str::from_utf8(data).unwrap_or("<binary>");
                println!("Client: message is '{}'.", text);
                match context.downcast_ref::<String>() {
                    Some(ctx) => println!("Client: reply_context is '{}'.", ctx),
                    None => println!("Client: reply_context is '<null>'."),
                }
                let _ = eng.disconnect(conn);
                done_in_handler.set(true);
            }
            _ => {}
        }
    };

    let mut engine = Engine::new(handler).expect("failed to build reactor");
    engine.connect(&address, None).expect("connect failed");

    while !done.get() {
        engine.run_loop(10);
    }
}
