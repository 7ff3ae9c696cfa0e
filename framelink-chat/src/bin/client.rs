//! Dummy chat client.
//!
//! Dials N sessions to the world server and sends a chat line on each every
//! 500 ms via a repeating timer whose callback keeps rescheduling while the
//! client runs. Received broadcasts are logged. Shares the fixed-tick loop
//! contract with the server.

use std::cell::{Cell, RefCell};
use std::process::ExitCode;
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use tracing::{debug, error, info, warn};

use framelink_core::error::NetError;
use framelink_core::event::{
    service_event_queue, session_event_queue, ServiceEvent, ServiceEventRx, SessionEvent,
    SessionEventRx, SessionEventTx, TcpStream,
};
use framelink_core::manager::SessionManager;
use framelink_core::options::NetOptions;
use framelink_core::pool::{IoHandle, IoThreadPool};
use framelink_core::service::{ClientService, ResolveTarget};
use framelink_core::session::{Session, SessionId};
use framelink_core::timer::Timer;
use framelink_proto::{MessageDispatcher, MessageQueue, MessageRegistry, MessageSerializer};

use framelink_chat::schema::{ChatBroadcast, ChatRequest};
use framelink_chat::now_ms;

const TICK_INTERVAL: Duration = Duration::from_millis(50);
const CHAT_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Parser, Debug)]
#[command(name = "dummy-client", about = "Load-generating chat client")]
struct Args {
    /// Server host name or address.
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Server port or service name.
    #[arg(long, default_value = "12345")]
    port: String,

    /// Number of concurrent connections to open.
    #[arg(long, default_value_t = 10)]
    connections: usize,

    /// Log level when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// I/O worker threads; 0 means one per hardware thread.
    #[arg(long, default_value_t = 0)]
    io_threads: usize,
}

fn main() -> ExitCode {
    let args = Args::parse();
    framelink_chat::init_logging(&args.log_level);
    match DummyClient::new(&args) {
        Ok(mut client) => {
            client.run();
            ExitCode::SUCCESS
        }
        Err(error) => {
            error!(%error, "failed to start dummy client");
            ExitCode::FAILURE
        }
    }
}

struct DummyClient {
    running: bool,
    /// Mirror of `running` readable from timer callbacks.
    alive: Rc<Cell<bool>>,
    options: NetOptions,
    pool: IoThreadPool,
    io: IoHandle,
    service: std::sync::Arc<ClientService>,
    service_rx: ServiceEventRx,
    session_tx: SessionEventTx,
    session_rx: SessionEventRx,
    manager: Rc<RefCell<SessionManager>>,
    serializer: Rc<RefCell<MessageSerializer>>,
    next_chat_id: Rc<Cell<u64>>,
    registry: MessageRegistry,
    messages: MessageQueue,
    dispatcher: MessageDispatcher,
    timer: Timer,
}

impl DummyClient {
    fn new(args: &Args) -> Result<Self, NetError> {
        let options = NetOptions::default();
        let mut pool = IoThreadPool::new();
        if args.io_threads == 0 {
            pool.run_default()?;
        } else {
            pool.run(args.io_threads)?;
        }
        let io = pool.handle();

        let (service_tx, service_rx) = service_event_queue();
        let (session_tx, session_rx) = session_event_queue();
        let service = ClientService::new(
            ResolveTarget::new(args.host.clone(), args.port.clone()),
            args.connections,
            service_tx,
            &pool,
        )?;

        let serializer = Rc::new(RefCell::new(MessageSerializer::new(&options)));
        let mut registry = MessageRegistry::new();
        registry.register::<ChatBroadcast>();
        let mut dispatcher = MessageDispatcher::new();
        dispatcher.register::<ChatBroadcast, _>(|session_id, message: &ChatBroadcast| {
            info!(
                session = session_id,
                from = %message.sender_name,
                server_message_id = message.server_message_id,
                content = %message.content,
                "chat broadcast"
            );
        });

        Ok(Self {
            running: true,
            alive: Rc::new(Cell::new(true)),
            options,
            pool,
            io,
            service,
            service_rx,
            session_tx,
            session_rx,
            manager: Rc::new(RefCell::new(SessionManager::new())),
            serializer,
            next_chat_id: Rc::new(Cell::new(1)),
            registry,
            messages: MessageQueue::new(),
            dispatcher,
            timer: Timer::new(),
        })
    }

    fn run(&mut self) {
        info!("dummy client starting");
        self.service.start();

        let mut tick_count: u32 = 0;
        let mut last_report = Instant::now();
        while self.running {
            let tick_start = Instant::now();

            self.process_service_events();
            self.process_session_events();
            self.process_messages();
            self.timer.update();

            tick_count += 1;
            if last_report.elapsed() >= Duration::from_secs(1) {
                debug!(ticks = tick_count, "tick rate");
                last_report = Instant::now();
                tick_count = 0;
            }
            if let Some(remaining) = TICK_INTERVAL.checked_sub(tick_start.elapsed()) {
                thread::sleep(remaining);
            }
        }

        self.close();
    }

    fn close(&mut self) {
        info!("dummy client closing");
        self.alive.set(false);
        self.service.stop();
        self.manager.borrow().stop_all();
        while !self.manager.borrow().is_empty() {
            self.process_session_events();
            thread::yield_now();
        }
        self.process_service_events();
        self.timer.clear();
        self.pool.reset();
        self.pool.join();
        info!("dummy client closed");
    }

    fn process_service_events(&mut self) {
        while let Ok(event) = self.service_rx.try_recv() {
            match event {
                ServiceEvent::Close => {
                    info!("service closed, stopping client");
                    self.running = false;
                    self.alive.set(false);
                }
                ServiceEvent::Connect(socket) => self.handle_connect(socket),
                ServiceEvent::Accept(_) => {
                    error!("unexpected accept event on the client");
                }
            }
        }
    }

    fn handle_connect(&mut self, socket: TcpStream) {
        if !self.running {
            debug!("not running, dropping established connection");
            return;
        }
        let session = Session::spawn(socket, self.session_tx.clone(), &self.io, &self.options);
        let session_id = session.id();
        self.manager.borrow_mut().add(session.clone());
        session.start();
        self.schedule_chat(session_id);
    }

    /// Periodic chat driver for one session; reschedules while the client
    /// runs and the session accepts sends.
    fn schedule_chat(&mut self, session_id: SessionId) {
        let manager = Rc::clone(&self.manager);
        let serializer = Rc::clone(&self.serializer);
        let alive = Rc::clone(&self.alive);
        let next_chat_id = Rc::clone(&self.next_chat_id);
        self.timer
            .schedule_repeating(Duration::ZERO, CHAT_INTERVAL, move || {
                if !alive.get() {
                    return false;
                }
                let chat = ChatRequest {
                    sender_name: "dummy".into(),
                    content: "Hello, framelink world!".into(),
                    client_message_id: next_chat_id.replace(next_chat_id.get() + 1),
                    client_sent_at_ms: now_ms(),
                };
                let chunk = match serializer.borrow_mut().serialize(&chat) {
                    Ok(chunk) => chunk,
                    Err(error) => {
                        error!(%error, "failed to serialize chat request");
                        return false;
                    }
                };
                if !manager.borrow().send(session_id, chunk) {
                    debug!(session = session_id, "session gone, stopping chat timer");
                    return false;
                }
                true
            });
    }

    fn process_session_events(&mut self) {
        while let Ok(event) = self.session_rx.try_recv() {
            match event {
                SessionEvent::Close(session_id) => {
                    self.manager.borrow_mut().remove(session_id);
                }
                SessionEvent::Receive(session_id) => self.handle_receive(session_id),
            }
        }
    }

    fn handle_receive(&mut self, session_id: SessionId) {
        if !self.running {
            debug!(session = session_id, "not running, skipping receive event");
            return;
        }
        let session = match self.manager.borrow().find(session_id) {
            Some(session) => session.clone(),
            None => {
                warn!(session = session_id, "receive event for unknown session");
                return;
            }
        };
        loop {
            let Some(front) = session.front_packet() else {
                break;
            };
            let result = self.messages.push(session_id, &front.view(), &self.registry);
            drop(front);
            match result {
                Ok(()) => session.pop_front_packet(),
                Err(error) => {
                    error!(session = session_id, %error, "stopping session after protocol violation");
                    session.stop();
                    return;
                }
            }
        }
        session.receive();
    }

    fn process_messages(&mut self) {
        while self.running {
            let Some(entry) = self.messages.front() else {
                break;
            };
            self.dispatcher.dispatch(entry);
            self.messages.pop();
        }
    }
}
