//! Supervisor behavior through the protocol: process-group kills, stdin
//! rewriting, and stdin write bounds.

mod common;

use std::time::Duration;

use nix::sys::signal::killpg;
use nix::unistd::Pid;
use serde_json::json;

use common::{read_json, read_json_until, send_request, start_test_server};

#[tokio::test]
async fn test_kill_terminates_whole_process_group() {
    let fixture = start_test_server();

    let mut subscriber = fixture.connect().await;
    send_request(&mut subscriber, json!({"method": "subscribeEvents"})).await;
    assert_eq!(read_json(&mut subscriber).await["success"], true);

    let mut control = fixture.connect().await;
    send_request(
        &mut control,
        json!({
            "method": "spawn",
            "params": {
                "command": "/bin/sh",
                "args": ["-c", "sleep 100 & sleep 100 & wait"]
            }
        }),
    )
    .await;
    let reply = read_json(&mut control).await;
    assert_eq!(reply["success"], true);
    let id = reply["result"]["id"].as_str().unwrap().to_owned();

    let pgid = fixture.backend.tracker().pid(&id).expect("pid recorded");
    #[allow(clippy::cast_possible_wrap)]
    let pgid = Pid::from_raw(pgid as i32);

    send_request(&mut control, json!({"method": "kill", "params": {"id": id}})).await;
    assert_eq!(read_json(&mut control).await["success"], true);

    let exit = read_json_until(&mut subscriber, |v| v["type"] == "exit").await;
    assert_eq!(exit["id"], id);
    assert_eq!(exit["signal"], "SIGTERM");

    // The grandchildren (the sleeps) must be gone too: probing the group
    // eventually reports no such process.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        match killpg(pgid, None) {
            Err(nix::errno::Errno::ESRCH) => break,
            _ if tokio::time::Instant::now() > deadline => {
                panic!("process group {pgid} still has members");
            },
            _ => tokio::time::sleep(Duration::from_millis(50)).await,
        }
    }

    fixture.server.stop().await;
}

#[tokio::test]
async fn test_kill_unknown_process_fails_clearly() {
    let fixture = start_test_server();
    let mut conn = fixture.connect().await;

    send_request(
        &mut conn,
        json!({"method": "kill", "params": {"id": "ghost"}}),
    )
    .await;
    let reply = read_json(&mut conn).await;
    assert_eq!(
        reply,
        json!({"success": false, "error": "process ghost not found"})
    );

    fixture.server.stop().await;
}

#[tokio::test]
async fn test_write_stdin_applies_forward_remap() {
    let fixture = start_test_server();

    let mut subscriber = fixture.connect().await;
    send_request(&mut subscriber, json!({"method": "subscribeEvents"})).await;
    assert_eq!(read_json(&mut subscriber).await["success"], true);

    let mut control = fixture.connect().await;
    send_request(
        &mut control,
        json!({
            "method": "spawn",
            "params": {"name": "alpha", "command": "/bin/cat"}
        }),
    )
    .await;
    let reply = read_json(&mut control).await;
    let id = reply["result"]["id"].as_str().unwrap().to_owned();

    send_request(
        &mut control,
        json!({
            "method": "writeStdin",
            "params": {"id": id, "data": "open /sessions/alpha/notes.md\n"}
        }),
    )
    .await;
    assert_eq!(read_json(&mut control).await["success"], true);

    // `/sessions/alpha` does not exist on the host, so reverse mapping is
    // off and cat's echo shows the real session path.
    let real_prefix = fixture
        .tmp
        .path()
        .join("data/sessions/alpha")
        .display()
        .to_string();
    let stdout = read_json_until(&mut subscriber, |v| v["type"] == "stdout").await;
    assert_eq!(
        stdout["data"].as_str().unwrap(),
        format!("open {real_prefix}/notes.md\n")
    );

    send_request(&mut control, json!({"method": "kill", "params": {"id": id}})).await;
    assert_eq!(read_json(&mut control).await["success"], true);

    fixture.server.stop().await;
}

#[tokio::test]
async fn test_write_stdin_strips_skill_plugin_prefix() {
    let fixture = start_test_server();

    let mut subscriber = fixture.connect().await;
    send_request(&mut subscriber, json!({"method": "subscribeEvents"})).await;
    assert_eq!(read_json(&mut subscriber).await["success"], true);

    let mut control = fixture.connect().await;
    send_request(
        &mut control,
        json!({"method": "spawn", "params": {"command": "/bin/cat"}}),
    )
    .await;
    let reply = read_json(&mut control).await;
    let id = reply["result"]["id"].as_str().unwrap().to_owned();

    send_request(
        &mut control,
        json!({
            "method": "writeStdin",
            "params": {"id": id, "data": "{\"content\":\"/document-skills:pdf extract\"}\n"}
        }),
    )
    .await;
    assert_eq!(read_json(&mut control).await["success"], true);

    let stdout = read_json_until(&mut subscriber, |v| v["type"] == "stdout").await;
    assert_eq!(
        stdout["data"].as_str().unwrap(),
        "{\"content\":\"/pdf extract\"}\n"
    );

    send_request(&mut control, json!({"method": "kill", "params": {"id": id}})).await;
    assert_eq!(read_json(&mut control).await["success"], true);

    fixture.server.stop().await;
}

#[tokio::test]
async fn test_write_stdin_to_exited_process_fails() {
    let fixture = start_test_server();

    let mut subscriber = fixture.connect().await;
    send_request(&mut subscriber, json!({"method": "subscribeEvents"})).await;
    assert_eq!(read_json(&mut subscriber).await["success"], true);

    let mut control = fixture.connect().await;
    send_request(
        &mut control,
        json!({"method": "spawn", "params": {"command": "/bin/true"}}),
    )
    .await;
    let reply = read_json(&mut control).await;
    let id = reply["result"]["id"].as_str().unwrap().to_owned();

    read_json_until(&mut subscriber, |v| v["type"] == "exit").await;

    // The exit event precedes the latch flip by a hair; poll until the
    // supervisor reports the process gone.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        send_request(
            &mut control,
            json!({"method": "isProcessRunning", "params": {"id": id}}),
        )
        .await;
        let reply = read_json(&mut control).await;
        if reply["result"]["running"] == false {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "process never reported as exited"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    send_request(
        &mut control,
        json!({"method": "writeStdin", "params": {"id": id, "data": "late\n"}}),
    )
    .await;
    let reply = read_json(&mut control).await;
    assert_eq!(
        reply,
        json!({"success": false, "error": format!("process {id} has exited")})
    );

    fixture.server.stop().await;
}

#[tokio::test]
async fn test_write_stdin_times_out_on_non_draining_child() {
    let fixture = start_test_server();
    let mut control = fixture.connect().await;

    // sleep never reads stdin; a payload far beyond the pipe buffer blocks
    // the write until the 10-second bound trips.
    send_request(
        &mut control,
        json!({
            "method": "spawn",
            "params": {"command": "/bin/sleep", "args": ["60"]}
        }),
    )
    .await;
    let reply = read_json(&mut control).await;
    let id = reply["result"]["id"].as_str().unwrap().to_owned();

    let payload = "x".repeat(2 * 1024 * 1024);
    send_request(
        &mut control,
        json!({"method": "writeStdin", "params": {"id": id, "data": payload}}),
    )
    .await;

    let reply = read_json(&mut control).await;
    assert_eq!(reply["success"], false);
    assert_eq!(
        reply["error"].as_str().unwrap(),
        format!("stdin write timeout for process {id}")
    );

    send_request(&mut control, json!({"method": "kill", "params": {"id": id}})).await;
    assert_eq!(read_json(&mut control).await["success"], true);

    fixture.server.stop().await;
}

#[tokio::test]
async fn test_spawn_ids_are_distinct_and_increasing() {
    let fixture = start_test_server();
    let mut control = fixture.connect().await;

    send_request(
        &mut control,
        json!({"method": "spawn", "params": {"command": "/bin/true"}}),
    )
    .await;
    let first = read_json(&mut control).await;
    assert_eq!(first["result"]["id"], "proc-1");

    send_request(
        &mut control,
        json!({"method": "spawn", "params": {"command": "/bin/true"}}),
    )
    .await;
    let second = read_json(&mut control).await;
    assert_eq!(second["result"]["id"], "proc-2");

    // A caller-assigned id is preserved byte for byte.
    send_request(
        &mut control,
        json!({"method": "spawn", "params": {"id": "my-session", "command": "/bin/true"}}),
    )
    .await;
    let third = read_json(&mut control).await;
    assert_eq!(third["result"]["id"], "my-session");

    fixture.server.stop().await;
}

#[tokio::test]
async fn test_spawn_failure_reports_error_and_fatal_event() {
    let fixture = start_test_server();

    let mut subscriber = fixture.connect().await;
    send_request(&mut subscriber, json!({"method": "subscribeEvents"})).await;
    assert_eq!(read_json(&mut subscriber).await["success"], true);

    let mut control = fixture.connect().await;
    send_request(
        &mut control,
        json!({"method": "spawn", "params": {"command": "no_such_binary_12345"}}),
    )
    .await;
    let reply = read_json(&mut control).await;
    assert_eq!(reply["success"], false);

    let event = read_json_until(&mut subscriber, |v| v["type"] == "error").await;
    assert_eq!(event["fatal"], true);

    fixture.server.stop().await;
}
