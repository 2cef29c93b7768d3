#[cfg(test)]
mod tests {
	use obs_switcher::transport::{frame, Opcode};
	use obs_switcher::{ConnectionState, ObsConfig, ObsSwitcher, Priority};
	use serde_json::{json, Value};
	use std::io::{Read, Write};
	use std::net::{TcpListener, TcpStream};
	use std::thread;
	use std::time::{Duration, Instant};

	fn write_server_text(stream: &mut TcpStream, value: &Value) {
		let payload = value.to_string();
		let mut wire = vec![0x81];
		wire.push(u8::try_from(payload.len()).expect("short test payload"));
		wire.extend_from_slice(payload.as_bytes());
		stream.write_all(&wire).unwrap();
	}

	fn read_upgrade_request(stream: &mut TcpStream) -> String {
		let mut request = Vec::new();
		let mut byte = [0u8; 1];
		while !request.ends_with(b"\r\n\r\n") {
			stream.read_exact(&mut byte).unwrap();
			request.push(byte[0]);
		}
		String::from_utf8(request).unwrap()
	}

	/// Minimal OBS: upgrade, Hello with auth, expect Identify, answer Identified, then report the requested scene
	fn fake_obs(listener: TcpListener) -> thread::JoinHandle<(String, Value, Value)> {
		thread::spawn(move || {
			let (mut stream, _) = listener.accept().unwrap();
			let request = read_upgrade_request(&mut stream);

			stream.write_all(b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\r\n").unwrap();
			write_server_text(
				&mut stream,
				&json!({"op": 0, "d": {"obsWebSocketVersion": "5.1.0", "rpcVersion": 1, "authentication": {"challenge": "c1", "salt": "s1"}}}),
			);

			let identify: Value = serde_json::from_slice(frame::read_frame(&mut stream).unwrap().payload()).unwrap();
			write_server_text(&mut stream, &json!({"op": 2, "d": {"negotiatedRpcVersion": 1}}));

			let request_frame = frame::read_frame(&mut stream).unwrap();
			assert_eq!(request_frame.opcode, Opcode::Text);
			let switch: Value = serde_json::from_slice(request_frame.payload()).unwrap();
			let scene = switch["d"]["requestData"]["sceneName"].clone();
			write_server_text(
				&mut stream,
				&json!({"op": 5, "d": {"eventType": "CurrentProgramSceneChanged", "eventData": {"sceneName": scene}}}),
			);

			// hold the socket open until the client says goodbye
			let _ = frame::read_frame(&mut stream);
			(request, identify, switch)
		})
	}

	#[test]
	fn test_full_session_over_tcp() {
		let listener = TcpListener::bind("127.0.0.1:0").unwrap();
		let port = listener.local_addr().unwrap().port();
		let server = fake_obs(listener);

		let mut config = ObsConfig::new("127.0.0.1", port, "abc");
		config.ping_interval_ms = 60_000;
		let switcher = ObsSwitcher::new(config).unwrap();
		switcher.start_daemon().unwrap();

		let deadline = Instant::now() + Duration::from_secs(5);
		while !switcher.is_ready() && Instant::now() < deadline {
			thread::sleep(Duration::from_millis(10));
		}
		assert!(switcher.is_ready());

		switcher.switch_scene("Gameplay", Priority::High).unwrap();
		while switcher.current_scene().is_none() && Instant::now() < deadline {
			thread::sleep(Duration::from_millis(10));
		}
		assert_eq!(switcher.current_scene().as_deref(), Some("Gameplay"));
		assert_eq!(switcher.state(), ConnectionState::Connected);

		switcher.shutdown().unwrap();
		let (request, identify, switch) = server.join().unwrap();

		assert!(request.contains(&format!("Host: 127.0.0.1:{port}\r\n")));
		assert_eq!(identify["d"]["authentication"], "2NOyAyCN6/M3ksRrRmjwYTgzRTGrv0snpRxJ0AzDvRs=");
		assert_eq!(switch["d"]["requestType"], "SetCurrentProgramScene");
	}
}
