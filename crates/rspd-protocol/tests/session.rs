//! End-to-end sessions: a scripted GDB client over an in-memory stream
//! against the simulated host.

use std::time::Duration;

use rspd_core::events::TargetEventReceiver;
use rspd_core::platform::simulated::SimulatedTarget;
use rspd_core::types::{Address, Architecture, ProcessId, Registers};
use rspd_core::{ResumeMode, Target};
use rspd_protocol::config::ServerConfig;
use rspd_protocol::packet::{checksum, frame};
use rspd_protocol::session::{Session, SessionStats};
use rspd_protocol::SessionError;
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;

/// Minimal GDB side of the wire
struct Client
{
    stream: DuplexStream,
    acks: bool,
}

impl Client
{
    async fn write(&mut self, bytes: &[u8])
    {
        self.stream.write_all(bytes).await.expect("client write");
        self.stream.flush().await.expect("client flush");
    }

    async fn read_byte(&mut self) -> u8
    {
        tokio::time::timeout(Duration::from_secs(5), self.stream.read_u8())
            .await
            .expect("reply timed out")
            .expect("client read")
    }

    async fn expect_ack(&mut self)
    {
        assert_eq!(self.read_byte().await, b'+', "expected ack");
    }

    /// Read one framed reply, verify it, and ack it.
    async fn read_reply(&mut self) -> String
    {
        while self.read_byte().await != b'$' {}
        let mut payload = Vec::new();
        loop {
            match self.read_byte().await {
                b'#' => break,
                byte => payload.push(byte),
            }
        }
        let digits = [self.read_byte().await, self.read_byte().await];
        let digits = std::str::from_utf8(&digits).expect("ascii checksum");
        assert_eq!(u8::from_str_radix(digits, 16).expect("hex checksum"), checksum(&payload));
        if self.acks {
            self.write(b"+").await;
        }
        String::from_utf8(payload).expect("utf-8 reply")
    }

    /// Send `payload` without waiting for anything.
    async fn send(&mut self, payload: &str)
    {
        self.write(frame(payload).as_bytes()).await;
        if self.acks {
            self.expect_ack().await;
        }
    }

    async fn command(&mut self, payload: &str) -> String
    {
        self.send(payload).await;
        self.read_reply().await
    }
}

fn config() -> ServerConfig
{
    ServerConfig {
        port: 0,
        interrupt_timeout: Duration::from_millis(100),
        ..ServerConfig::default()
    }
}

fn start<T>(target: T, config: ServerConfig) -> (Client, JoinHandle<Result<SessionStats, SessionError>>)
where
    T: Target + 'static,
{
    let (client, server) = duplex(64 * 1024);
    let handle = tokio::spawn(async move {
        let mut target = target;
        Session::new(server, &mut target, &config).run().await
    });
    (Client { stream: client, acks: true }, handle)
}

async fn wait_until_running(target: &SimulatedTarget)
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !target.is_running() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("target never resumed");
}

#[tokio::test]
async fn test_supported_handshake()
{
    let (mut client, handle) = start(SimulatedTarget::demo(), config());

    client.write(b"$qSupported#37").await;
    client.expect_ack().await;
    assert_eq!(
        client.read_reply().await,
        "PacketSize=1000;swbreak+;hwbreak+;QStartNoAckMode+"
    );

    drop(client);
    let stats = handle.await.expect("join").expect("session");
    assert_eq!(stats.packets_received, 1);
}

#[tokio::test]
async fn test_corrupt_packet_is_naked_then_retried()
{
    let (mut client, handle) = start(SimulatedTarget::demo(), config());

    client.write(b"$qAttached#00").await;
    assert_eq!(client.read_byte().await, b'-');
    assert_eq!(client.command("qAttached").await, "0");

    drop(client);
    let stats = handle.await.expect("join").expect("session");
    assert_eq!(stats.checksum_failures, 1);
    assert_eq!(stats.packets_received, 1);
}

#[tokio::test]
async fn test_nak_resends_last_reply()
{
    let (mut client, handle) = start(SimulatedTarget::demo(), config());

    client.acks = false;
    client.send("qAttached").await;
    client.expect_ack().await;
    assert_eq!(client.read_reply().await, "0");
    client.write(b"-").await;
    assert_eq!(client.read_reply().await, "0");

    drop(client);
    handle.await.expect("join").expect("session");
}

#[tokio::test]
async fn test_breakpoint_stop_and_step_over()
{
    let target = SimulatedTarget::demo();
    let (mut client, handle) = start(target.clone(), config());

    assert_eq!(client.command("vAttach;64").await, "S05");
    assert_eq!(client.command("Z0,401010,1").await, "OK");
    assert_eq!(target.peek_memory(Address::from(0x40_1010), 1), Some(vec![0xCC]));
    // Reads see the original byte.
    assert_eq!(client.command("m401010,1").await, "90");

    assert_eq!(client.command("c").await, "S05");
    assert_eq!(client.command("p10").await, "1010400000000000");

    // Continuing steps off the trap and keeps it in place.
    client.send("c").await;
    wait_until_running(&target).await;
    assert_eq!(target.peek_memory(Address::from(0x40_1010), 1), Some(vec![0xCC]));
    client.write(&[0x03]).await;
    assert_eq!(client.read_reply().await, "S02");

    assert_eq!(client.command("z0,401010,1").await, "OK");
    assert_eq!(target.peek_memory(Address::from(0x40_1010), 1), Some(vec![0x90]));
    assert_eq!(client.command("D").await, "OK");

    let stats = handle.await.expect("join").expect("session");
    assert_eq!(stats.control.breakpoint_hits, 1);
    assert_eq!(stats.control.interrupts, 1);
    assert!(!target.is_attached());
}

#[tokio::test]
async fn test_breakpoint_at_stop_pc_fires_on_continue()
{
    let target = SimulatedTarget::demo();
    let (mut client, handle) = start(target.clone(), config());

    assert_eq!(client.command("vAttach;64").await, "S05");
    assert_eq!(client.command("Z0,401000,1").await, "OK");
    assert_eq!(client.command("c").await, "S05");
    assert_eq!(client.command("p10").await, "0010400000000000");

    // Now that it was hit, stepping leaves the trap behind.
    assert_eq!(client.command("s").await, "S05");
    assert_eq!(client.command("p10").await, "0110400000000000");
    assert_eq!(target.peek_memory(Address::from(0x40_1000), 1), Some(vec![0xCC]));
    assert_eq!(client.command("D").await, "OK");

    let stats = handle.await.expect("join").expect("session");
    assert_eq!(stats.control.breakpoint_hits, 1);
    assert_eq!(target.peek_memory(Address::from(0x40_1000), 1), Some(vec![0x90]));
}

#[tokio::test]
async fn test_memory_read_write_through_session()
{
    let target = SimulatedTarget::demo();
    let (mut client, handle) = start(target.clone(), config());
    assert_eq!(client.command("vAttach;64").await, "S05");
    assert_eq!(client.command("m7000,10").await, "000102030405060708090a0b0c0d0e0f");
    assert_eq!(client.command("M7000,4:AABBCCDD").await, "OK");
    assert_eq!(client.command("m7000,4").await, "aabbccdd");
    assert_eq!(client.command("M7000,4:aabb").await, "E01");
    assert_eq!(client.command("m10,4").await, "E0e");

    drop(client);
    let stats = handle.await.expect("join").expect("session");
    assert!(stats.cache.misses >= 2);
    assert_eq!(
        target.peek_memory(Address::from(0x7000), 4),
        Some(vec![0xAA, 0xBB, 0xCC, 0xDD])
    );
}

#[tokio::test]
async fn test_failed_write_over_breakpoint_keeps_saved_code()
{
    let target = SimulatedTarget::demo();
    let (mut client, handle) = start(target.clone(), config());
    assert_eq!(client.command("vAttach;64").await, "S05");
    assert_eq!(client.command("Z0,401000,1").await, "OK");

    // Starts one byte below the mapped code, so the host rejects it.
    assert_eq!(client.command("M400fff,2:aabb").await, "E0e");
    assert_eq!(client.command("m401000,1").await, "90");
    assert_eq!(client.command("z0,401000,1").await, "OK");
    assert_eq!(target.peek_memory(Address::from(0x40_1000), 1), Some(vec![0x90]));

    assert_eq!(client.command("D").await, "OK");
    handle.await.expect("join").expect("session");
}

#[tokio::test]
async fn test_register_set_round_trip()
{
    let target = SimulatedTarget::demo();
    let (mut client, handle) = start(target.clone(), config());
    assert_eq!(client.command("vAttach;64").await, "S05");

    let mut registers = Registers::zeroed(Architecture::X86_64);
    registers.set_pc(Address::from(0x40_1020));
    let stream = rspd_protocol::registers::encode_registers(&registers);
    assert_eq!(client.command(&format!("G{stream}")).await, "OK");
    assert_eq!(client.command("g").await, stream);
    assert_eq!(target.peek_registers().pc(), Address::from(0x40_1020));

    assert_eq!(client.command("Gabcd").await, "E01");
    assert_eq!(client.command("g").await, stream);

    drop(client);
    handle.await.expect("join").expect("session");
}

#[tokio::test]
async fn test_step_reports_trap()
{
    let target = SimulatedTarget::demo();
    let (mut client, handle) = start(target.clone(), config());
    assert_eq!(client.command("vAttach;64").await, "S05");

    assert_eq!(client.command("s").await, "S05");
    assert_eq!(target.peek_registers().pc(), Address::from(0x40_1001));
    assert_eq!(client.command("s401100").await, "S05");
    assert_eq!(target.peek_registers().pc(), Address::from(0x40_1101));

    drop(client);
    let stats = handle.await.expect("join").expect("session");
    assert_eq!(stats.control.steps, 2);
}

#[tokio::test]
async fn test_exit_while_running()
{
    let target = SimulatedTarget::demo();
    let (mut client, handle) = start(target.clone(), config());
    assert_eq!(client.command("vAttach;64").await, "S05");
    assert_eq!(client.command("Z0,401800,1").await, "OK");

    client.send("c401900").await;
    wait_until_running(&target).await;
    target.exit(0x103);
    assert_eq!(client.read_reply().await, "W03");
    assert_eq!(client.command("qAttached").await, "0");
    assert_eq!(client.command("g").await, "E02");

    drop(client);
    handle.await.expect("join").expect("session");
}

#[tokio::test]
async fn test_disconnect_restores_original_code()
{
    let target = SimulatedTarget::demo();
    let (mut client, handle) = start(target.clone(), config());
    assert_eq!(client.command("vAttach;64").await, "S05");
    assert_eq!(client.command("Z0,401004,1").await, "OK");
    assert_eq!(client.command("Z0,401008,1").await, "OK");

    drop(client);
    handle.await.expect("join").expect("session");
    assert_eq!(target.peek_memory(Address::from(0x40_1000), 16), Some(vec![0x90; 16]));
    assert!(!target.is_attached());
    assert_eq!(target.stats().detaches, 1);
}

#[tokio::test]
async fn test_disconnect_while_running()
{
    let target = SimulatedTarget::demo();
    let (mut client, handle) = start(target.clone(), config());
    assert_eq!(client.command("vAttach;64").await, "S05");
    assert_eq!(client.command("Z0,401004,1").await, "OK");
    client.send("c401010").await;
    wait_until_running(&target).await;

    drop(client);
    handle.await.expect("join").expect("session");
    assert_eq!(target.peek_memory(Address::from(0x40_1004), 1), Some(vec![0x90]));
    assert!(!target.is_attached());
}

#[tokio::test]
async fn test_kill_ends_session_without_reply()
{
    let target = SimulatedTarget::demo();
    let (mut client, handle) = start(target.clone(), config());
    assert_eq!(client.command("vAttach;64").await, "S05");
    assert_eq!(client.command("Z0,401004,1").await, "OK");

    client.send("k").await;
    handle.await.expect("join").expect("session");
    assert_eq!(target.stats().kills, 1);
    assert_eq!(target.peek_memory(Address::from(0x40_1004), 1), Some(vec![0x90]));
}

#[tokio::test]
async fn test_no_ack_mode()
{
    let (mut client, handle) = start(SimulatedTarget::demo(), config());

    assert_eq!(client.command("QStartNoAckMode").await, "OK");
    client.acks = false;
    assert_eq!(client.command("qAttached").await, "0");
    assert_eq!(client.command("vAttach;64").await, "S05");

    drop(client);
    handle.await.expect("join").expect("session");
}

#[tokio::test]
async fn test_unsupported_packets_get_empty_reply()
{
    let (mut client, handle) = start(SimulatedTarget::demo(), config());

    assert_eq!(client.command("vMustReplyEmpty").await, "");
    assert_eq!(client.command("qXfer:features:read:target.xml:0,fff").await, "");
    assert_eq!(client.command("X401000,0:").await, "");
    assert_eq!(client.command("vAttach;2a").await, "E07");

    drop(client);
    handle.await.expect("join").expect("session");
}

#[tokio::test]
async fn test_break_while_stopped_is_ignored()
{
    let (mut client, handle) = start(SimulatedTarget::demo(), config());

    assert_eq!(client.command("vAttach;64").await, "S05");
    client.write(&[0x03]).await;
    assert_eq!(client.command("?").await, "S05");

    drop(client);
    handle.await.expect("join").expect("session");
}

/// Host whose interrupt requests go nowhere
struct DeafTarget(SimulatedTarget);

impl Target for DeafTarget
{
    fn architecture(&self) -> Architecture
    {
        self.0.architecture()
    }

    fn attach(&mut self, pid: ProcessId) -> rspd_core::Result<TargetEventReceiver>
    {
        self.0.attach(pid)
    }

    fn detach(&mut self) -> rspd_core::Result<()>
    {
        self.0.detach()
    }

    fn kill(&mut self) -> rspd_core::Result<()>
    {
        self.0.kill()
    }

    fn suspend(&mut self) -> rspd_core::Result<()>
    {
        self.0.suspend()
    }

    fn interrupt(&mut self) -> rspd_core::Result<()>
    {
        Ok(())
    }

    fn resume(&mut self, mode: ResumeMode) -> rspd_core::Result<()>
    {
        self.0.resume(mode)
    }

    fn read_registers(&self) -> rspd_core::Result<Registers>
    {
        self.0.read_registers()
    }

    fn write_registers(&mut self, registers: &Registers) -> rspd_core::Result<()>
    {
        self.0.write_registers(registers)
    }

    fn read_memory(&self, address: Address, len: usize) -> rspd_core::Result<Vec<u8>>
    {
        self.0.read_memory(address, len)
    }

    fn write_memory(&mut self, address: Address, data: &[u8]) -> rspd_core::Result<usize>
    {
        self.0.write_memory(address, data)
    }
}

#[tokio::test]
async fn test_unanswered_interrupt_forces_stop()
{
    let target = SimulatedTarget::demo();
    let (mut client, handle) = start(DeafTarget(target.clone()), config());
    assert_eq!(client.command("vAttach;64").await, "S05");

    client.send("c").await;
    wait_until_running(&target).await;
    client.write(&[0x03]).await;
    assert_eq!(client.read_reply().await, "S02");
    assert!(!target.is_running());
    assert_eq!(client.command("?").await, "S02");

    drop(client);
    handle.await.expect("join").expect("session");
}
