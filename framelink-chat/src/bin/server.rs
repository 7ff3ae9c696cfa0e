//! Authoritative chat world server.
//!
//! Fixed-tick application loop over the network core: drain service events,
//! drain session events (framing packets into the message queue), dispatch
//! messages, update the timer. Graceful shutdown waits for every session to
//! close before releasing the I/O pool.

use std::cell::RefCell;
use std::net::{IpAddr, SocketAddr};
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
use framelink_core::service::ServerService;
use framelink_core::session::{Session, SessionId};
use framelink_core::timer::Timer;
use framelink_proto::{MessageDispatcher, MessageQueue, MessageRegistry, MessageSerializer};

use framelink_chat::room::ChatRoom;
use framelink_chat::schema::ChatRequest;

const TICK_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Parser, Debug)]
#[command(name = "world-server", about = "Authoritative chat world server")]
struct Args {
    /// Address to bind.
    #[arg(long, default_value = "127.0.0.1")]
    bind: IpAddr,

    /// TCP port to listen on.
    #[arg(long, default_value_t = 12345)]
    port: u16,

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
    match WorldServer::new(&args) {
        Ok(mut server) => {
            server.run();
            ExitCode::SUCCESS
        }
        Err(error) => {
            error!(%error, "failed to start world server");
            ExitCode::FAILURE
        }
    }
}

struct WorldServer {
    running: bool,
    options: NetOptions,
    pool: IoThreadPool,
    io: IoHandle,
    service: std::sync::Arc<ServerService>,
    service_rx: ServiceEventRx,
    session_tx: SessionEventTx,
    session_rx: SessionEventRx,
    manager: Rc<RefCell<SessionManager>>,
    room: Rc<RefCell<ChatRoom>>,
    registry: MessageRegistry,
    messages: MessageQueue,
    dispatcher: MessageDispatcher,
    timer: Timer,
}

impl WorldServer {
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
        let service = ServerService::new(SocketAddr::new(args.bind, args.port), service_tx, &pool)?;

        let manager = Rc::new(RefCell::new(SessionManager::new()));
        let room = Rc::new(RefCell::new(ChatRoom::new(MessageSerializer::new(&options))));
        let mut registry = MessageRegistry::new();
        registry.register::<ChatRequest>();
        let mut dispatcher = MessageDispatcher::new();
        ChatRoom::register_handlers(&room, &manager, &mut dispatcher);

        Ok(Self {
            running: true,
            options,
            pool,
            io,
            service,
            service_rx,
            session_tx,
            session_rx,
            manager,
            room,
            registry,
            messages: MessageQueue::new(),
            dispatcher,
            timer: Timer::new(),
        })
    }

    fn run(&mut self) {
        info!("world server starting");
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
        info!("world server closing");
        self.service.stop();
        self.manager.borrow().stop_all();
        while !self.manager.borrow().is_empty() {
            self.process_session_events();
            thread::yield_now();
        }
        self.process_service_events();
        self.pool.reset();
        self.pool.join();
        info!("world server closed");
    }

    fn process_service_events(&mut self) {
        while let Ok(event) = self.service_rx.try_recv() {
            match event {
                ServiceEvent::Close => {
                    info!("service closed, stopping server");
                    self.running = false;
                }
                ServiceEvent::Accept(socket) => self.handle_accept(socket),
                ServiceEvent::Connect(_) => {
                    error!("unexpected connect event on the server");
                }
            }
        }
    }

    fn handle_accept(&mut self, socket: TcpStream) {
        if !self.running {
            debug!("not running, dropping accepted connection");
            return;
        }
        let session = Session::spawn(socket, self.session_tx.clone(), &self.io, &self.options);
        let session_id = session.id();
        self.manager.borrow_mut().add(session.clone());
        self.room.borrow_mut().on_client_accepted(session_id);
        session.start();
    }

    fn process_session_events(&mut self) {
        while let Ok(event) = self.session_rx.try_recv() {
            match event {
                SessionEvent::Close(session_id) => {
                    self.manager.borrow_mut().remove(session_id);
                    self.room.borrow_mut().on_client_closed(session_id);
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
