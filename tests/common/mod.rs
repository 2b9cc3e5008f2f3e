//! A scripted IMAP server for the integration tests.
//!
//! It knows just enough of the protocol to serve a fixed account to one client: `LOGIN`,
//! `AUTHENTICATE PLAIN`, `LIST`, `EXAMINE`, `UID FETCH` and `LOGOUT`.

#![allow(dead_code)]

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use imap_backup::{ConnectionConfig, SecurityMode};

pub const INTERNAL_DATE: &str = "17-Jul-1996 02:44:25 -0700";
pub const INTERNAL_DATE_EPOCH: u64 = 837596665;

#[derive(Clone, Debug)]
pub struct Mailbox {
    pub name: String,
    pub attributes: String,
    pub messages: Vec<(u32, Vec<u8>)>,
    /// UIDs that are listed but vanish before their content is fetched.
    pub expunged: Vec<u32>,
    pub reject: bool,
}

impl Mailbox {
    pub fn new(name: &str) -> Self {
        Mailbox {
            name: name.to_string(),
            attributes: String::new(),
            messages: Vec::new(),
            expunged: Vec::new(),
            reject: false,
        }
    }

    pub fn container(name: &str) -> Self {
        Mailbox {
            attributes: "\\Noselect".to_string(),
            ..Mailbox::new(name)
        }
    }

    pub fn message(mut self, uid: u32, body: &str) -> Self {
        self.messages.push((uid, body.as_bytes().to_vec()));
        self
    }

    pub fn expunged(mut self, uid: u32) -> Self {
        self.expunged.push(uid);
        self
    }

    pub fn rejected(mut self) -> Self {
        self.reject = true;
        self
    }
}

#[derive(Clone, Debug, Default)]
pub struct Account {
    pub mailboxes: Vec<Mailbox>,
    pub rejected_logins: usize,
}

impl Account {
    pub fn new(mailboxes: Vec<Mailbox>) -> Self {
        Account {
            mailboxes,
            rejected_logins: 0,
        }
    }

    pub fn rejecting_logins(mut self, count: usize) -> Self {
        self.rejected_logins = count;
        self
    }
}

pub struct FakeServer {
    port: u16,
    commands: Arc<Mutex<Vec<String>>>,
    handle: Option<JoinHandle<()>>,
}

impl FakeServer {
    /// Serve `account` to the first client that connects.
    pub fn start(account: Account) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let commands = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&commands);
        let handle = thread::spawn(move || {
            let (socket, _) = listener.accept().unwrap();
            socket
                .set_read_timeout(Some(Duration::from_secs(10)))
                .unwrap();
            serve(socket, account, &log);
        });
        FakeServer {
            port,
            commands,
            handle: Some(handle),
        }
    }

    pub fn config(&self) -> ConnectionConfig {
        ConnectionConfig::new("127.0.0.1", self.port)
            .security(SecurityMode::Plain)
            .timeout(Duration::from_secs(10))
    }

    /// Wait for the client to go away and return every command line it sent.
    pub fn commands(mut self) -> Vec<String> {
        if let Some(handle) = self.handle.take() {
            handle.join().unwrap();
        }
        self.commands.lock().unwrap().clone()
    }
}

fn unquote(s: &str) -> String {
    s.trim_matches('"').replace("\\\"", "\"").replace("\\\\", "\\")
}

fn serve(socket: TcpStream, mut account: Account, log: &Mutex<Vec<String>>) {
    let mut reader = BufReader::new(socket.try_clone().unwrap());
    let mut out = socket;
    out.write_all(b"* OK [CAPABILITY IMAP4rev1 AUTH=PLAIN] fake server ready\r\n")
        .unwrap();

    let mut selected: Option<Mailbox> = None;
    loop {
        let mut line = String::new();
        match reader.read_line(&mut line) {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        let line = line.trim_end().to_string();
        log.lock().unwrap().push(line.clone());
        let (tag, command) = line.split_once(' ').unwrap_or((line.as_str(), ""));
        let upper = command.to_ascii_uppercase();

        let mut reply = String::new();
        if upper == "CAPABILITY" {
            reply.push_str("* CAPABILITY IMAP4rev1 AUTH=PLAIN\r\n");
            reply.push_str(&format!("{} OK done\r\n", tag));
        } else if upper.starts_with("LOGIN ") || upper == "AUTHENTICATE PLAIN" {
            if upper.starts_with("AUTHENTICATE") {
                out.write_all(b"+ \r\n").unwrap();
                let mut response = String::new();
                if reader.read_line(&mut response).unwrap_or(0) == 0 {
                    return;
                }
            }
            if account.rejected_logins > 0 {
                account.rejected_logins -= 1;
                reply.push_str(&format!("{} NO Invalid credentials\r\n", tag));
            } else {
                reply.push_str(&format!("{} OK Logged in\r\n", tag));
            }
        } else if upper.starts_with("LIST ") {
            for mailbox in &account.mailboxes {
                reply.push_str(&format!(
                    "* LIST ({}) \"/\" \"{}\"\r\n",
                    mailbox.attributes, mailbox.name
                ));
            }
            reply.push_str(&format!("{} OK List completed\r\n", tag));
        } else if upper.starts_with("EXAMINE ") {
            let name = unquote(&command["EXAMINE ".len()..]);
            selected = account
                .mailboxes
                .iter()
                .find(|m| m.name == name && !m.reject && m.attributes.is_empty())
                .cloned();
            match selected {
                Some(ref mailbox) => {
                    let exists = mailbox.messages.len() + mailbox.expunged.len();
                    reply.push_str(&format!("* {} EXISTS\r\n", exists));
                    reply.push_str("* 0 RECENT\r\n");
                    reply.push_str("* OK [UIDVALIDITY 1] UIDs valid\r\n");
                    reply.push_str(&format!("{} OK [READ-ONLY] Examine completed\r\n", tag));
                }
                None => reply.push_str(&format!("{} NO No such mailbox\r\n", tag)),
            }
        } else if upper == "UID FETCH 1:* (UID RFC822.SIZE)" {
            if let Some(ref mailbox) = selected {
                let mut uids: Vec<_> = mailbox.messages.iter().map(|(uid, _)| *uid).collect();
                uids.extend(&mailbox.expunged);
                uids.sort();
                for (seq, uid) in uids.iter().enumerate() {
                    reply.push_str(&format!("* {} FETCH (UID {} RFC822.SIZE 0)\r\n", seq + 1, uid));
                }
            }
            reply.push_str(&format!("{} OK Fetch completed\r\n", tag));
        } else if upper.starts_with("UID FETCH ") {
            let uid: u32 = command.split(' ').nth(2).and_then(|u| u.parse().ok()).unwrap_or(0);
            if let Some(ref mailbox) = selected {
                if let Some(seq) = mailbox.messages.iter().position(|(u, _)| *u == uid) {
                    let body = &mailbox.messages[seq].1;
                    reply.push_str(&format!(
                        "* {} FETCH (UID {} FLAGS (\\Seen) INTERNALDATE \"{}\" BODY[] {{{}}}\r\n",
                        seq + 1,
                        uid,
                        INTERNAL_DATE,
                        body.len()
                    ));
                    out.write_all(reply.as_bytes()).unwrap();
                    out.write_all(body).unwrap();
                    reply = ")\r\n".to_string();
                }
            }
            reply.push_str(&format!("{} OK Fetch completed\r\n", tag));
        } else if upper == "LOGOUT" {
            reply.push_str("* BYE Logging out\r\n");
            reply.push_str(&format!("{} OK Logout completed\r\n", tag));
            out.write_all(reply.as_bytes()).unwrap();
            return;
        } else {
            reply.push_str(&format!("{} BAD Unknown command\r\n", tag));
        }
        if out.write_all(reply.as_bytes()).is_err() {
            return;
        }
    }
}
