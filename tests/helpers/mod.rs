//! Shared fixtures for integration tests
//!
//! - `FixtureServer`: a minimal HTTP/1.1 server on 127.0.0.1 serving fixed bodies
//! - `write_script`: executable shell stand-ins for hdiutil, installer and startosinstall
//! - `isolate_from_proxies`: keeps local fixture traffic away from any proxy

#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;

const PROXY_VARS: &[&str] = &[
    "http_proxy",
    "HTTP_PROXY",
    "https_proxy",
    "HTTPS_PROXY",
    "all_proxy",
    "ALL_PROXY",
];

/// Drop proxy settings for this test process
pub fn isolate_from_proxies() {
    for var in PROXY_VARS {
        std::env::remove_var(var);
    }
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    std::env::set_var("no_proxy", "127.0.0.1,localhost");
}

/// Same isolation for a spawned binary
pub fn isolate_command(cmd: &mut assert_cmd::Command) {
    for var in PROXY_VARS {
        cmd.env_remove(var);
    }
    cmd.env("NO_PROXY", "127.0.0.1,localhost");
    cmd.env("no_proxy", "127.0.0.1,localhost");
}

/// Serves registered paths; everything else is 404
pub struct FixtureServer {
    base_url: String,
    routes: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl FixtureServer {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind fixture server");
        let base_url = format!("http://{}", listener.local_addr().expect("local addr"));
        let routes: Arc<Mutex<HashMap<String, Vec<u8>>>> = Arc::default();
        let requests: Arc<Mutex<Vec<String>>> = Arc::default();

        {
            let routes = routes.clone();
            let requests = requests.clone();
            thread::spawn(move || {
                for stream in listener.incoming().flatten() {
                    let routes = routes.clone();
                    let requests = requests.clone();
                    thread::spawn(move || serve(stream, &routes, &requests));
                }
            });
        }

        Self {
            base_url,
            routes,
            requests,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn add(&self, path: &str, body: impl Into<Vec<u8>>) {
        self.routes
            .lock()
            .expect("routes lock")
            .insert(path.to_string(), body.into());
    }

    /// Paths requested so far, in arrival order
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().expect("requests lock").clone()
    }
}

fn serve(stream: TcpStream, routes: &Mutex<HashMap<String, Vec<u8>>>, requests: &Mutex<Vec<String>>) {
    let mut reader = BufReader::new(match stream.try_clone() {
        Ok(stream) => stream,
        Err(_) => return,
    });

    let mut request_line = String::new();
    if reader.read_line(&mut request_line).is_err() {
        return;
    }
    // Skip headers
    loop {
        let mut header = String::new();
        match reader.read_line(&mut header) {
            Ok(0) => break,
            Ok(_) if header == "\r\n" || header == "\n" => break,
            Ok(_) => continue,
            Err(_) => return,
        }
    }

    let path = request_line.split_whitespace().nth(1).unwrap_or("/").to_string();
    requests.lock().expect("requests lock").push(path.clone());

    let body = routes.lock().expect("routes lock").get(&path).cloned();
    let mut stream = stream;
    let response = match body {
        Some(body) => {
            let mut response = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nContent-Type: application/octet-stream\r\nConnection: close\r\n\r\n",
                body.len()
            )
            .into_bytes();
            response.extend_from_slice(&body);
            response
        }
        None => b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_vec(),
    };
    let _ = stream.write_all(&response);
    let _ = stream.flush();
}

/// Write an executable `#!/bin/sh` script
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{}", body)).expect("write script");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod script");
    path
}

/// hdiutil stand-in.
///
/// `create` touches its last argument and prints it as the created image;
/// `attach` makes `<mount root>/dmg.fixture`; `detach` appends its
/// arguments to `<dir>/detach.log`.
pub fn fake_hdiutil(dir: &Path) -> PathBuf {
    let detach_log = dir.join("detach.log");
    write_script(
        dir,
        "hdiutil",
        &format!(
            r#"op="$1"
shift
case "$op" in
create)
    for last in "$@"; do :; done
    if [ -e "$last" ]; then echo "hdiutil: create failed - File exists" >&2; exit 1; fi
    : > "$last"
    printf '<?xml version="1.0" encoding="UTF-8"?>\n<plist version="1.0"><array><string>%s</string></array></plist>\n' "$last"
    ;;
attach)
    root=""
    while [ $# -gt 0 ]; do
        if [ "$1" = "-mountRandom" ]; then root="$2"; fi
        shift
    done
    mnt="$root/dmg.fixture"
    mkdir -p "$mnt"
    printf '<?xml version="1.0" encoding="UTF-8"?>\n<plist version="1.0"><dict><key>system-entities</key><array><dict><key>dev-entry</key><string>/dev/disk9</string></dict><dict><key>dev-entry</key><string>/dev/disk9s1</string><key>mount-point</key><string>%s</string></dict></array></dict></plist>\n' "$mnt"
    ;;
detach)
    echo "$@" >> '{}'
    ;;
esac
"#,
            detach_log.display()
        ),
    )
}

/// installer stand-in that lays down an installer app in the target volume
/// and exits with `exit_code`
pub fn fake_installer(dir: &Path, startosinstall_body: &str, exit_code: i32) -> PathBuf {
    let startosinstall = write_script(dir, "startosinstall.template", startosinstall_body);
    write_script(
        dir,
        "installer",
        &format!(
            r#"target=""
while [ $# -gt 0 ]; do
    if [ "$1" = "-target" ]; then target="$2"; fi
    shift
done
echo "installer:PHASE:Preparing for installation"
echo "installer:%25.5"
app="$target/Applications/Install macOS Monterey.app/Contents/Resources"
mkdir -p "$app"
cp '{}' "$app/startosinstall"
chmod 755 "$app/startosinstall"
echo "installer:STATUS:Writing files"
echo "installer:%100"
exit {}
"#,
            startosinstall.display(),
            exit_code
        ),
    )
}
