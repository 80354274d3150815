#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;

use cozylife::protocol::decode_command;
use cozylife::protocol::AttributeMap;
use cozylife::protocol::Command;
use cozylife::protocol::CommandKind;
use cozylife::protocol::Response;
use serde_json::json;
use serde_json::Value;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::net::TcpListener;

type Handler = dyn Fn(&Command, &mut AttributeMap) -> Vec<Vec<u8>> + Send + Sync;

/// A device emulator listening on a loopback port.
pub struct FakeDevice {
    pub addr: SocketAddr,
    pub connections: Arc<AtomicUsize>,
    pub received: Arc<Mutex<Vec<Command>>>,
    pub data: Arc<Mutex<AttributeMap>>,
}

impl FakeDevice {
    pub async fn start(
        data: AttributeMap,
        handler: impl Fn(&Command, &mut AttributeMap) -> Vec<Vec<u8>> + Send + Sync + 'static,
    ) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handler: Arc<Handler> = Arc::new(handler);
        let connections = Arc::new(AtomicUsize::new(0));
        let received = Arc::new(Mutex::new(Vec::new()));
        let data = Arc::new(Mutex::new(data));

        tokio::spawn({
            let connections = connections.clone();
            let received = received.clone();
            let data = data.clone();
            async move {
                while let Ok((stream, _)) = listener.accept().await {
                    connections.fetch_add(1, Ordering::SeqCst);
                    let handler = handler.clone();
                    let received = received.clone();
                    let data = data.clone();
                    tokio::spawn(async move {
                        let mut stream = BufReader::new(stream);
                        let mut line = Vec::new();
                        loop {
                            line.clear();
                            match stream.read_until(b'\n', &mut line).await {
                                Ok(0) | Err(_) => return,
                                Ok(_) => {}
                            }
                            let Ok(command) = decode_command(&line) else {
                                continue;
                            };
                            received.lock().unwrap().push(command.clone());
                            let frames = {
                                let mut data = data.lock().unwrap();
                                handler(&command, &mut *data)
                            };
                            for frame in frames {
                                if stream.write_all(&frame).await.is_err() {
                                    return;
                                }
                            }
                        }
                    });
                }
            }
        });

        Self {
            addr,
            connections,
            received,
            data,
        }
    }

    /// A light that behaves like real firmware: info, query and set all work.
    pub async fn light(dtp: &'static str, attr: Vec<u16>, data: AttributeMap) -> Self {
        Self::start(data, move |cmd, data| {
            let msg = match cmd.kind() {
                CommandKind::Info => json!({"did": "abc", "pid": "xyz", "dtp": dtp}),
                CommandKind::Query => json!({"attr": attr, "data": data}),
                CommandKind::Set => {
                    let attrs = cmd.attributes().cloned().unwrap_or_default();
                    data.extend(attrs.clone());
                    json!({"attr": attrs.keys().collect::<Vec<_>>(), "data": attrs})
                }
            };
            vec![reply(cmd, msg)]
        })
        .await
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> Vec<Command> {
        self.received.lock().unwrap().clone()
    }
}

/// Successful reply echoing the command's sequence number.
pub fn reply(cmd: &Command, msg: Value) -> Vec<u8> {
    let msg = match msg {
        Value::Object(map) => Some(map),
        _ => None,
    };
    Response::new(cmd.sn(), 0, msg).encode().unwrap()
}
