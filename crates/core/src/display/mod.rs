//! Presentation side: a consumer event loop fed through a bounded
//! [`FrameExchange`].
//!
//! ```text
//!   producer thread                       display thread
//!   ───────────────                       ──────────────
//!   acquire_buffer() ◀──── free pool ◀─── present, recycle
//!        │                                      ▲
//!        ▼                                      │
//!   submit(frame) ──── DisplayEvent::NewFrame ──┘
//! ```
//!
//! The pixel work itself belongs to a [`Presenter`] backend;
//! [`headless::HeadlessPresenter`] provides one without a window.

use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};

use crate::error::Result;
use crate::messaging::{Envelope, Message, Module, ModuleClass, ModuleRef, Response};

pub mod exchange;
pub mod headless;

pub use exchange::{DEFAULT_CAPACITY, Frame, FrameExchange, SubmitOutcome, SubmitPolicy};

/// Prefix of the text message that sets the window title.
const TITLE_COMMAND: &str = "win-title ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Rgb24,
    Rgba32,
    Uyvy,
    I420,
}

impl PixelFormat {
    /// Bytes needed for one `width` x `height` picture.
    pub fn frame_size(self, width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;
        match self {
            Self::Rgb24 => pixels * 3,
            Self::Rgba32 => pixels * 4,
            Self::Uyvy => pixels * 2,
            Self::I420 => pixels * 3 / 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoFormat {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub fps: f64,
}

impl VideoFormat {
    pub fn new(width: u32, height: u32, pixel_format: PixelFormat, fps: f64) -> Self {
        Self {
            width,
            height,
            pixel_format,
            fps,
        }
    }

    pub fn frame_size(&self) -> usize {
        self.pixel_format.frame_size(self.width, self.height)
    }
}

impl fmt::Display for VideoFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} {:?} @ {:.2}",
            self.width, self.height, self.pixel_format, self.fps
        )
    }
}

/// Input to the consumer loop.
#[derive(Debug)]
pub enum DisplayEvent<H> {
    NewFrame(Frame<H>),
    /// A buffer of an earlier format, to be destroyed unseen.
    Release(Frame<H>),
    Reconfigure(VideoFormat),
    /// Window exposed or resized.
    Redraw,
    /// The display module has mail.
    NewMessage,
    Quit,
}

/// Windowing backend.
pub trait Presenter {
    /// Backend handle of one pooled picture.
    type Buffer: Send + 'static;

    fn create_buffer(&mut self, format: &VideoFormat) -> Result<Self::Buffer>;

    fn destroy_buffer(&mut self, buffer: Self::Buffer);

    fn present(&mut self, frame: &Frame<Self::Buffer>) -> Result<()>;

    fn set_title(&mut self, title: &str);

    fn set_fullscreen(&mut self, fullscreen: bool);

    fn set_deinterlace(&mut self, _enabled: bool) {}
}

/// Consumer event loop owning the presenter.
///
/// Registers a `display` module below the given parent; its text messages
/// set the title (`win-title <text>`) or carry a numeric key code (`d`
/// toggles deinterlacing, `f` fullscreen, `q` quits).
pub struct Display<P: Presenter> {
    presenter: P,
    exchange: Arc<FrameExchange<P::Buffer>>,
    events: Receiver<DisplayEvent<P::Buffer>>,
    module: Module,
    last_displayed: Option<u64>,
    fullscreen: bool,
    deinterlace: bool,
    frames_shown: u64,
}

impl<P: Presenter> Display<P> {
    pub fn new(presenter: P, parent: &ModuleRef) -> Self {
        Self::with_capacity(presenter, parent, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(presenter: P, parent: &ModuleRef, capacity: usize) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        let module = Module::new(ModuleClass::Display, parent);
        let notify: Sender<DisplayEvent<P::Buffer>> = tx.clone();
        module.set_notifier(move || {
            let _ = notify.send(DisplayEvent::NewMessage);
        });

        Self {
            presenter,
            exchange: Arc::new(FrameExchange::new(capacity, tx)),
            events: rx,
            module,
            last_displayed: None,
            fullscreen: false,
            deinterlace: false,
            frames_shown: 0,
        }
    }

    /// Producer-side handle.
    pub fn exchange(&self) -> Arc<FrameExchange<P::Buffer>> {
        self.exchange.clone()
    }

    pub fn presenter(&self) -> &P {
        &self.presenter
    }

    pub fn module(&self) -> ModuleRef {
        self.module.handle()
    }

    pub fn frames_shown(&self) -> u64 {
        self.frames_shown
    }

    pub fn is_fullscreen(&self) -> bool {
        self.fullscreen
    }

    pub fn is_deinterlacing(&self) -> bool {
        self.deinterlace
    }

    /// Process events until [`DisplayEvent::Quit`].
    pub fn run(&mut self) {
        tracing::debug!(capacity = self.exchange.capacity(), "display loop started");
        while let Ok(event) = self.events.recv() {
            if self.handle_event(event).is_break() {
                break;
            }
        }
        tracing::debug!(frames = self.frames_shown, "display loop finished");
    }

    /// Handle one event; `Break` when the loop should end.
    pub fn handle_event(&mut self, event: DisplayEvent<P::Buffer>) -> ControlFlow<()> {
        match event {
            DisplayEvent::NewFrame(frame) => self.show(frame),
            DisplayEvent::Release(frame) => self.presenter.destroy_buffer(frame.into_buffer()),
            DisplayEvent::Reconfigure(format) => self.rebuild(format),
            DisplayEvent::Redraw => self.redraw(),
            DisplayEvent::NewMessage => return self.drain_messages(),
            DisplayEvent::Quit => return ControlFlow::Break(()),
        }
        ControlFlow::Continue(())
    }

    fn show(&mut self, frame: Frame<P::Buffer>) {
        let mut pool = self.exchange.lock();
        if frame.generation() != pool.generation {
            drop(pool);
            self.presenter.destroy_buffer(frame.into_buffer());
            return;
        }
        if let Err(e) = self.presenter.present(&frame) {
            tracing::warn!(frame = frame.id(), error = %e, "present failed");
        } else {
            self.frames_shown += 1;
            self.last_displayed = Some(frame.id());
        }
        self.exchange.recycle(&mut pool, frame);
    }

    /// Present the last shown buffer again if it is still pooled.
    fn redraw(&mut self) {
        let Some(id) = self.last_displayed else {
            return;
        };
        let pool = self.exchange.lock();
        if let Some(frame) = pool.free.iter().find(|f| f.id() == id)
            && let Err(e) = self.presenter.present(frame)
        {
            tracing::warn!(frame = id, error = %e, "redraw failed");
        }
    }

    fn rebuild(&mut self, format: VideoFormat) {
        let mut pool = self.exchange.lock();
        for frame in pool.free.drain(..).collect::<Vec<_>>() {
            self.presenter.destroy_buffer(frame.into_buffer());
        }
        pool.generation += 1;
        self.last_displayed = None;

        let mut status = true;
        for _ in 0..self.exchange.capacity() {
            match self.presenter.create_buffer(&format) {
                Ok(buffer) => {
                    let id = pool.next_id;
                    pool.next_id += 1;
                    let generation = pool.generation;
                    pool.free.push_back(Frame::new(id, generation, format, buffer));
                }
                Err(e) => {
                    tracing::error!(%format, error = %e, "cannot create display buffer");
                    status = false;
                    break;
                }
            }
        }
        if status {
            pool.format = Some(format);
            tracing::info!(%format, "display reconfigured");
        } else {
            for frame in pool.free.drain(..).collect::<Vec<_>>() {
                self.presenter.destroy_buffer(frame.into_buffer());
            }
            pool.format = None;
        }
        self.exchange.finish_reconfigure(&mut pool, status);
    }

    fn drain_messages(&mut self) -> ControlFlow<()> {
        let mut flow = ControlFlow::Continue(());
        while let Some(envelope) = self.module.check_message() {
            if self.handle_message(envelope).is_break() {
                flow = ControlFlow::Break(());
            }
        }
        flow
    }

    fn handle_message(&mut self, envelope: Envelope) -> ControlFlow<()> {
        let Message::Text(text) = envelope.message() else {
            envelope.respond(Response::bad_request("unsupported message"));
            return ControlFlow::Continue(());
        };

        if let Some(title) = text.strip_prefix(TITLE_COMMAND) {
            self.presenter.set_title(title);
            envelope.respond(Response::ok());
            return ControlFlow::Continue(());
        }

        let key = text.trim().parse::<u32>().ok().and_then(char::from_u32);
        match key {
            Some('d') => {
                self.deinterlace = !self.deinterlace;
                self.presenter.set_deinterlace(self.deinterlace);
                tracing::info!(enabled = self.deinterlace, "deinterlacing toggled");
            }
            Some('f') => {
                self.fullscreen = !self.fullscreen;
                self.presenter.set_fullscreen(self.fullscreen);
            }
            Some('q') => {
                envelope.respond(Response::ok());
                return ControlFlow::Break(());
            }
            _ => {
                tracing::warn!(%text, "unknown display command");
                envelope.respond(Response::bad_request("unknown command"));
                return ControlFlow::Continue(());
            }
        }
        envelope.respond(Response::ok());
        ControlFlow::Continue(())
    }
}

impl<P: Presenter> Drop for Display<P> {
    fn drop(&mut self) {
        let mut frames = self.exchange.close();
        frames.extend(self.events.try_iter().filter_map(|event| match event {
            DisplayEvent::NewFrame(frame) | DisplayEvent::Release(frame) => Some(frame),
            _ => None,
        }));
        for frame in frames {
            self.presenter.destroy_buffer(frame.into_buffer());
        }
    }
}
