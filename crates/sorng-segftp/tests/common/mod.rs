//! In-process FTP server for integration tests.
//!
//! Speaks just enough RFC 959 for the client: USER/PASS, TYPE, PASV, REST,
//! RETR, STOR, APPE, SIZE, LIST and the directory commands. Files live in
//! memory. Replies go through one writer task so terminal replies from data
//! tasks interleave with command replies the way a real server's do.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use sorng_segftp::ftp::FtpConnectionConfig;

#[derive(Default)]
pub struct MockState {
    pub files: HashMap<String, Vec<u8>>,
    pub username: String,
    pub password: String,
    /// Every command line received, in order.
    pub commands: Vec<String>,
    pub pasv_count: usize,
    /// `REST <n>` with this offset is answered 550.
    pub fail_rest_at: Option<u64>,
    pub refuse_pasv: bool,
    /// Delay the reply to the named verb (e.g. `"PASS"`).
    pub delays: HashMap<String, Duration>,
    /// RETR sends this many bytes, then stalls.
    pub stall_after: Option<usize>,
    /// RETR from this restart offset sends one byte per interval.
    pub drip: Option<(u64, Duration)>,
    /// RETR waits this long after accepting before it sends anything.
    pub retr_hold: Option<Duration>,
    /// RETR data connections open right now, and the most seen at once.
    pub active_data: usize,
    pub peak_data: usize,
    /// STOR/APPE reads this many bytes, then drops the data connection.
    pub drop_upload_after: Option<usize>,
    /// STOR/APPE is refused with this code.
    pub refuse_upload: Option<u16>,
    /// SIZE is answered with this code whatever the file.
    pub size_code: Option<u16>,
}

pub struct MockServer {
    pub addr: SocketAddr,
    pub state: Arc<Mutex<MockState>>,
}

impl MockServer {
    pub async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    pub async fn start_with(setup: impl FnOnce(&mut MockState)) -> Self {
        let mut state = MockState {
            username: "alice".into(),
            password: "secret".into(),
            ..Default::default()
        };
        setup(&mut state);
        let state = Arc::new(Mutex::new(state));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept_state = state.clone();
        tokio::spawn(async move {
            while let Ok((sock, _)) = listener.accept().await {
                tokio::spawn(serve_session(sock, accept_state.clone()));
            }
        });
        Self { addr, state }
    }

    pub fn config(&self) -> FtpConnectionConfig {
        FtpConnectionConfig::new("127.0.0.1", self.addr.port()).with_credentials("alice", "secret")
    }

    pub fn put_file(&self, name: &str, data: &[u8]) {
        self.state.lock().unwrap().files.insert(name.to_string(), data.to_vec());
    }

    pub fn file(&self, name: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().files.get(name).cloned()
    }

    pub fn pasv_count(&self) -> usize {
        self.state.lock().unwrap().pasv_count
    }

    pub fn peak_data_connections(&self) -> usize {
        self.state.lock().unwrap().peak_data
    }

    pub fn commands_starting_with(&self, verb: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .commands
            .iter()
            .filter(|c| c.starts_with(verb))
            .cloned()
            .collect()
    }
}

/// Deterministic pseudo-random payload.
pub fn payload(len: usize) -> Vec<u8> {
    let mut x: u32 = 0x2545_f491;
    (0..len)
        .map(|_| {
            x ^= x << 13;
            x ^= x >> 17;
            x ^= x << 5;
            (x >> 24) as u8
        })
        .collect()
}

async fn serve_session(sock: TcpStream, state: Arc<Mutex<MockState>>) {
    let (rd, mut wr) = sock.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            if wr.write_all(line.as_bytes()).await.is_err() {
                break;
            }
        }
    });

    let reply = |tx: &mpsc::UnboundedSender<String>, text: String| {
        let _ = tx.send(format!("{}\r\n", text));
    };
    reply(&tx, "220 mock ready".into());

    let mut lines = BufReader::new(rd).lines();
    let mut rest: u64 = 0;
    let mut data_listener: Option<TcpListener> = None;
    let mut rename_from: Option<String> = None;

    while let Ok(Some(line)) = lines.next_line().await {
        let (verb, arg) = match line.split_once(' ') {
            Some((v, a)) => (v.to_ascii_uppercase(), a.to_string()),
            None => (line.to_ascii_uppercase(), String::new()),
        };
        let delay = {
            let mut st = state.lock().unwrap();
            st.commands.push(line.clone());
            st.delays.get(&verb).copied()
        };
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }

        match verb.as_str() {
            "USER" => {
                if arg.eq_ignore_ascii_case("anonymous") {
                    reply(&tx, "230 anonymous access granted".into());
                } else {
                    reply(&tx, "331 password required".into());
                }
            }
            "PASS" => {
                let ok = state.lock().unwrap().password == arg;
                if ok {
                    reply(&tx, "230 logged in".into());
                } else {
                    reply(&tx, "530 login incorrect".into());
                }
            }
            "TYPE" => reply(&tx, "200 type set".into()),
            "NOOP" => reply(&tx, "200 ok".into()),
            "PASV" => {
                let refuse = {
                    let mut st = state.lock().unwrap();
                    st.pasv_count += 1;
                    st.refuse_pasv
                };
                if refuse {
                    reply(&tx, "502 passive mode disabled".into());
                    continue;
                }
                let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
                let port = listener.local_addr().unwrap().port();
                data_listener = Some(listener);
                reply(
                    &tx,
                    format!("227 Entering Passive Mode (127,0,0,1,{},{}).", port / 256, port % 256),
                );
            }
            "REST" => {
                let offset: u64 = arg.parse().unwrap_or(0);
                if state.lock().unwrap().fail_rest_at == Some(offset) {
                    reply(&tx, "550 restart position refused".into());
                } else {
                    rest = offset;
                    reply(&tx, format!("350 restarting at {}", offset));
                }
            }
            "SIZE" => {
                let (size, forced) = {
                    let st = state.lock().unwrap();
                    (st.files.get(&arg).map(Vec::len), st.size_code)
                };
                match (forced, size) {
                    (Some(code), _) => reply(&tx, format!("{} SIZE not available", code)),
                    (None, Some(len)) => reply(&tx, format!("213 {}", len)),
                    (None, None) => reply(&tx, "550 no such file".into()),
                }
            }
            "RETR" => {
                let (data, stall, drip, hold) = {
                    let st = state.lock().unwrap();
                    let drip = st.drip.filter(|(offset, _)| *offset == rest).map(|(_, every)| every);
                    (st.files.get(&arg).cloned(), st.stall_after, drip, st.retr_hold)
                };
                let Some(data) = data else {
                    reply(&tx, "550 no such file".into());
                    continue;
                };
                let Some(listener) = data_listener.take() else {
                    reply(&tx, "425 use PASV first".into());
                    continue;
                };
                let start = (rest as usize).min(data.len());
                rest = 0;
                reply(&tx, "150 opening data connection".into());
                let tx = tx.clone();
                let state = state.clone();
                tokio::spawn(async move {
                    let Ok((mut sock, _)) = listener.accept().await else {
                        let _ = tx.send("425 no data connection\r\n".into());
                        return;
                    };
                    {
                        let mut st = state.lock().unwrap();
                        st.active_data += 1;
                        st.peak_data = st.peak_data.max(st.active_data);
                    }
                    if let Some(hold) = hold {
                        tokio::time::sleep(hold).await;
                    }
                    let body = &data[start..];
                    let result = match (stall, drip) {
                        (Some(n), _) => {
                            let head = &body[..n.min(body.len())];
                            let first = sock.write_all(head).await;
                            tokio::time::sleep(Duration::from_secs(10)).await;
                            first
                        }
                        (None, Some(every)) => {
                            let _ = sock.set_nodelay(true);
                            let mut sent = Ok(());
                            for byte in body {
                                tokio::time::sleep(every).await;
                                sent = sock.write_all(std::slice::from_ref(byte)).await;
                                if sent.is_err() {
                                    break;
                                }
                            }
                            sent
                        }
                        (None, None) => sock.write_all(body).await,
                    };
                    drop(sock);
                    state.lock().unwrap().active_data -= 1;
                    // A client that stops at its segment boundary may reset
                    // the connection; that still counts as a completed send.
                    let _ = result;
                    let _ = tx.send("226 transfer complete\r\n".into());
                });
            }
            "STOR" | "APPE" => {
                let Some(listener) = data_listener.take() else {
                    reply(&tx, "425 use PASV first".into());
                    continue;
                };
                let (refused, drop_after) = {
                    let st = state.lock().unwrap();
                    (st.refuse_upload, st.drop_upload_after)
                };
                if let Some(code) = refused {
                    reply(&tx, format!("{} requested action not taken", code));
                    continue;
                }
                reply(&tx, "150 ready to receive".into());
                let tx = tx.clone();
                let state = state.clone();
                let append = verb == "APPE";
                tokio::spawn(async move {
                    let Ok((mut sock, _)) = listener.accept().await else {
                        let _ = tx.send("425 no data connection\r\n".into());
                        return;
                    };
                    if let Some(n) = drop_after {
                        let mut head = vec![0u8; n];
                        let _ = sock.read_exact(&mut head).await;
                        // Unread data makes the close a reset.
                        drop(sock);
                        let _ = tx.send("426 connection closed, transfer aborted\r\n".into());
                        return;
                    }
                    let mut received = Vec::new();
                    if sock.read_to_end(&mut received).await.is_err() {
                        let _ = tx.send("426 connection closed, transfer aborted\r\n".into());
                        return;
                    }
                    {
                        let mut st = state.lock().unwrap();
                        let file = st.files.entry(arg).or_default();
                        if !append {
                            file.clear();
                        }
                        file.extend_from_slice(&received);
                    }
                    let _ = tx.send("226 transfer complete\r\n".into());
                });
            }
            "LIST" => {
                let Some(listener) = data_listener.take() else {
                    reply(&tx, "425 use PASV first".into());
                    continue;
                };
                let listing: String = {
                    let st = state.lock().unwrap();
                    let mut names: Vec<_> = st.files.iter().collect();
                    names.sort_by(|a, b| a.0.cmp(b.0));
                    names
                        .into_iter()
                        .map(|(name, data)| format!("-rw-r--r-- 1 ftp ftp {} Jan 01 00:00 {}\r\n", data.len(), name))
                        .collect()
                };
                reply(&tx, "150 here comes the listing".into());
                let tx = tx.clone();
                tokio::spawn(async move {
                    if let Ok((mut sock, _)) = listener.accept().await {
                        let _ = sock.write_all(listing.as_bytes()).await;
                    }
                    let _ = tx.send("226 directory send ok\r\n".into());
                });
            }
            "PWD" => reply(&tx, "257 \"/pub\" is the current directory".into()),
            "CWD" => reply(&tx, "250 directory changed".into()),
            "CDUP" => reply(&tx, "200 ok".into()),
            "MKD" => reply(&tx, format!("257 \"{}\" created", arg)),
            "RMD" => reply(&tx, "250 removed".into()),
            "DELE" => {
                let removed = state.lock().unwrap().files.remove(&arg).is_some();
                if removed {
                    reply(&tx, "250 deleted".into());
                } else {
                    reply(&tx, "550 no such file".into());
                }
            }
            "RNFR" => {
                if state.lock().unwrap().files.contains_key(&arg) {
                    rename_from = Some(arg);
                    reply(&tx, "350 ready for RNTO".into());
                } else {
                    reply(&tx, "550 no such file".into());
                }
            }
            "RNTO" => match rename_from.take() {
                Some(from) => {
                    let mut st = state.lock().unwrap();
                    if let Some(data) = st.files.remove(&from) {
                        st.files.insert(arg, data);
                    }
                    reply(&tx, "250 renamed".into());
                }
                None => reply(&tx, "503 RNFR first".into()),
            },
            "QUIT" => {
                reply(&tx, "221 bye".into());
                break;
            }
            _ => reply(&tx, "502 command not implemented".into()),
        }
    }
}
