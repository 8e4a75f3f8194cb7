use std::{cell::RefCell, rc::Rc};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embedded_hal_mock::eh1::pwm::{Mock as PwmMock, Transaction as PwmTrans};
use rover_core::utils::{
    config::RoverConfig,
    connection::uart::{
        Advertisement, AttrHandle, BleEvent, BleStack, ConnHandle, ServiceDef, ServiceError,
        ServiceState, UartService, MAX_CONNECTIONS,
    },
    controllers::{
        command::{Action, CommandDecoder, CommandMailbox, DecodedCommand},
        Actuators,
    },
    ControlLoop, Duration,
};

/// Value handles handed out by the fake stack.
pub const TX_HANDLE: AttrHandle = 11;
pub const RX_HANDLE: AttrHandle = 12;

/// Calls observed by the fake BLE stack.
#[derive(Debug, Clone, PartialEq)]
pub enum StackCall {
    Register,
    SetBuffer { attr: AttrHandle, len: usize, append: bool },
    Advertise(Advertisement),
    Notify { conn: ConnHandle, attr: AttrHandle, data: Vec<u8> },
    Disconnect(ConnHandle),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FakeError;

/// Records every call; peers listed in `unreachable` fail to accept notifications.
#[derive(Default, Clone)]
pub struct FakeStack {
    calls: Rc<RefCell<Vec<StackCall>>>,
    unreachable: Vec<ConnHandle>,
    fail_register: bool,
}

impl FakeStack {
    fn calls(&self) -> Vec<StackCall> {
        self.calls.borrow().clone()
    }

    fn advertise_count(&self) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|c| matches!(c, StackCall::Advertise(_)))
            .count()
    }

    fn clear(&self) {
        self.calls.borrow_mut().clear();
    }
}

impl BleStack for FakeStack {
    type Error = FakeError;

    fn register_uart_service(
        &mut self,
        _service: &ServiceDef,
    ) -> Result<(AttrHandle, AttrHandle), FakeError> {
        if self.fail_register {
            return Err(FakeError);
        }
        self.calls.borrow_mut().push(StackCall::Register);
        Ok((TX_HANDLE, RX_HANDLE))
    }

    fn set_buffer(
        &mut self,
        attr: AttrHandle,
        len: usize,
        append: bool,
    ) -> Result<(), FakeError> {
        self.calls
            .borrow_mut()
            .push(StackCall::SetBuffer { attr, len, append });
        Ok(())
    }

    fn advertise(
        &mut self,
        adv: &Advertisement,
    ) -> Result<(), FakeError> {
        self.calls.borrow_mut().push(StackCall::Advertise(adv.clone()));
        Ok(())
    }

    fn notify(
        &mut self,
        conn: ConnHandle,
        attr: AttrHandle,
        data: &[u8],
    ) -> Result<(), FakeError> {
        if self.unreachable.contains(&conn) {
            return Err(FakeError);
        }
        self.calls.borrow_mut().push(StackCall::Notify {
            conn,
            attr,
            data: data.to_vec(),
        });
        Ok(())
    }

    fn disconnect(
        &mut self,
        conn: ConnHandle,
    ) -> Result<(), FakeError> {
        self.calls.borrow_mut().push(StackCall::Disconnect(conn));
        Ok(())
    }
}

type PlainService = UartService<FakeStack, (), 64>;

fn plain_service(stack: &FakeStack) -> PlainService {
    UartService::new(stack.clone(), (), &RoverConfig::default()).unwrap()
}

#[test]
fn test_new_registers_and_advertises() {
    let stack = FakeStack::default();
    let service = plain_service(&stack);

    let calls = stack.calls();
    assert_eq!(calls[0], StackCall::Register);
    assert_eq!(
        calls[1],
        StackCall::SetBuffer {
            attr: RX_HANDLE,
            len: 100,
            append: true
        }
    );
    match &calls[2] {
        StackCall::Advertise(adv) => {
            assert_eq!(adv.name.as_str(), "lightings");
            assert_eq!(adv.appearance, 128);
            assert_eq!(adv.interval, Duration::from_millis(500));
        }
        other => panic!("expected advertise, got {:?}", other),
    }
    assert_eq!(service.state(), ServiceState::Advertising);
    assert_eq!(service.tx_handle(), TX_HANDLE);
    assert_eq!(service.rx_handle(), RX_HANDLE);
}

#[test]
fn test_register_failure_is_surfaced() {
    let stack = FakeStack {
        fail_register: true,
        ..Default::default()
    };
    let result: Result<PlainService, _> = UartService::new(stack, (), &RoverConfig::default());
    assert!(matches!(result, Err(ServiceError::Register(FakeError))));
}

#[test]
fn test_connect_disconnect_readvertises_once() {
    let stack = FakeStack::default();
    let mut service = plain_service(&stack);
    stack.clear();

    service.on_event(BleEvent::Connect(1));
    assert_eq!(service.state(), ServiceState::Connected(1));
    assert_eq!(stack.advertise_count(), 0);

    service.on_event(BleEvent::Disconnect(1));
    assert_eq!(service.connections().count(), 0);
    assert_eq!(service.state(), ServiceState::Advertising);
    assert_eq!(stack.advertise_count(), 1);
}

#[test]
fn test_disconnect_readvertises_with_peers_left() {
    let stack = FakeStack::default();
    let mut service = plain_service(&stack);
    stack.clear();

    service.on_connect(1);
    service.on_connect(2);
    service.on_disconnect(1);

    assert!(service.is_connected(2));
    assert_eq!(service.state(), ServiceState::Connected(1));
    assert_eq!(stack.advertise_count(), 1);
}

#[test]
fn test_advertise_is_idempotent() {
    let stack = FakeStack::default();
    let mut service = plain_service(&stack);
    stack.clear();

    service.advertise();
    service.advertise();

    let calls = stack.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0], calls[1]);
    assert_eq!(service.state(), ServiceState::Advertising);
}

#[test]
fn test_writes_buffer_in_order() {
    let stack = FakeStack::default();
    let mut service = plain_service(&stack);

    service.on_connect(7);
    service.on_write(7, RX_HANDLE, b"AB");
    service.on_write(7, RX_HANDLE, b"CD");

    assert_eq!(service.any(), 4);
    assert_eq!(service.read(Some(1)).as_slice(), b"A");
    assert_eq!(service.read(None).as_slice(), b"BCD");
    assert_eq!(service.any(), 0);
}

#[test]
fn test_writes_from_unknown_peer_or_attr_ignored() {
    let stack = FakeStack::default();
    let mut service = plain_service(&stack);

    service.on_connect(1);
    service.on_write(2, RX_HANDLE, b"STOP");
    service.on_write(1, TX_HANDLE, b"STOP");
    assert_eq!(service.any(), 0);

    service.on_disconnect(1);
    service.on_write(1, RX_HANDLE, b"STOP");
    assert_eq!(service.any(), 0);
}

#[test]
fn test_notify_reaches_every_peer_best_effort() {
    let stack = FakeStack {
        unreachable: vec![2],
        ..Default::default()
    };
    let mut service = plain_service(&stack);
    service.on_connect(1);
    service.on_connect(2);
    service.on_connect(3);
    stack.clear();

    service.notify(b"ok");

    let mut notified: Vec<ConnHandle> = stack
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            StackCall::Notify { conn, attr, data } => {
                assert_eq!(attr, TX_HANDLE);
                assert_eq!(data, b"ok");
                Some(conn)
            }
            _ => None,
        })
        .collect();
    notified.sort();
    assert_eq!(notified, vec![1, 3]);
}

#[test]
fn test_close_disconnects_all() {
    let stack = FakeStack::default();
    let mut service = plain_service(&stack);
    service.on_connect(4);
    service.on_connect(5);
    stack.clear();

    service.close();

    let mut disconnected: Vec<ConnHandle> = stack
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            StackCall::Disconnect(conn) => Some(conn),
            _ => None,
        })
        .collect();
    disconnected.sort();
    assert_eq!(disconnected, vec![4, 5]);
    assert_eq!(service.connections().count(), 0);
}

#[test]
fn test_write_reaches_mailbox_through_decoder() {
    let mailbox: CommandMailbox<CriticalSectionRawMutex> = CommandMailbox::new();
    let stack = FakeStack::default();
    let mut service: UartService<_, _, 64> =
        UartService::new(stack, CommandDecoder::new(&mailbox), &RoverConfig::default()).unwrap();

    service.on_connect(1);
    service.on_write(1, RX_HANDLE, b"FORWARD:50\n");
    assert_eq!(
        mailbox.take(),
        (
            DecodedCommand {
                action: Action::Forward,
                magnitude: 50
            },
            true
        )
    );
    // the handler drained the buffer
    assert_eq!(service.any(), 0);

    service.on_write(1, RX_HANDLE, b"STOP");
    assert_eq!(
        mailbox.latest(),
        DecodedCommand {
            action: Action::Stop,
            magnitude: 50
        }
    );

    // garbage leaves the previous command in place
    service.on_write(1, RX_HANDLE, &[0xc3, 0x28]);
    service.on_write(1, RX_HANDLE, b"LEFT:abc");
    assert_eq!(mailbox.latest().action, Action::Stop);
}

#[test]
fn test_central_beyond_connection_limit_is_ignored() {
    let mailbox: CommandMailbox<CriticalSectionRawMutex> = CommandMailbox::new();
    let stack = FakeStack::default();
    let mut service: UartService<_, _, 64> =
        UartService::new(stack, CommandDecoder::new(&mailbox), &RoverConfig::default()).unwrap();

    for conn in 1..=MAX_CONNECTIONS as ConnHandle {
        service.on_event(BleEvent::Connect(conn));
    }
    let extra = MAX_CONNECTIONS as ConnHandle + 1;
    service.on_event(BleEvent::Connect(extra));

    assert_eq!(service.state(), ServiceState::Connected(MAX_CONNECTIONS));
    assert!(!service.is_connected(extra));

    service.on_write(extra, RX_HANDLE, b"FORWARD:50");
    assert_eq!(service.any(), 0);
    assert_eq!(mailbox.take(), (DecodedCommand::STOPPED, false));

    // a freed slot admits the central again
    service.on_event(BleEvent::Disconnect(1));
    service.on_event(BleEvent::Connect(extra));
    service.on_write(extra, RX_HANDLE, b"FORWARD:50");
    assert_eq!(
        mailbox.latest(),
        DecodedCommand {
            action: Action::Forward,
            magnitude: 50
        }
    );
}

fn pwm_write(duty: u16) -> [PwmTrans; 2] {
    // set_duty_cycle_fraction reads the resolution, then writes
    [PwmTrans::max_duty_cycle(1023), PwmTrans::set_duty_cycle(duty)]
}

#[test]
fn test_end_to_end_forward_then_servo() {
    let mailbox: CommandMailbox<CriticalSectionRawMutex> = CommandMailbox::new();
    let mut service: UartService<_, _, 64> = UartService::new(
        FakeStack::default(),
        CommandDecoder::new(&mailbox),
        &RoverConfig::default(),
    )
    .unwrap();

    // IN1..IN4 for FORWARD:50 on the first tick, then untouched by SERVO.
    let motors = [
        PwmMock::new(&pwm_write(0)),
        PwmMock::new(&pwm_write(512)),
        PwmMock::new(&pwm_write(512)),
        PwmMock::new(&pwm_write(0)),
    ];
    let servo = PwmMock::new(&pwm_write(70));
    let mut control = ControlLoop::new(
        &mailbox,
        Actuators::new(motors, servo),
        RoverConfig::default().control_period(),
    );

    service.on_connect(1);
    service.on_write(1, RX_HANDLE, b"FORWARD:50");
    control.tick();
    service.on_write(1, RX_HANDLE, b"SERVO:90");
    control.tick();

    let (motors, mut servo) = control.into_actuators().release();
    for mut motor in motors {
        motor.done();
    }
    servo.done();
}
