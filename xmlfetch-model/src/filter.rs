//! The passthrough contract filters are built on.
//!
//! A filter sees one event at a time and may emit any number of events in
//! response. It can be driven from either side: [`FilterSink`] pushes into a
//! downstream sink fixed at construction, [`Filtered`] is pulled by the
//! consumer and pulls from its upstream source in turn.

use crate::diagnostic::Diagnostic;
use crate::event::{Event, EventSink, EventSource};
use std::collections::VecDeque;

pub trait EventFilter {
    fn process(&mut self, event: Event, out: &mut dyn EventSink);
}

/// Forwards everything unchanged.
#[derive(Default, Debug, Clone, Copy)]
pub struct PassThrough;

impl EventFilter for PassThrough {
    fn process(&mut self, event: Event, out: &mut dyn EventSink) {
        out.event(event)
    }
}

impl<F: EventFilter + ?Sized> EventFilter for Box<F> {
    fn process(&mut self, event: Event, out: &mut dyn EventSink) {
        (**self).process(event, out)
    }
}

/// A filter with its downstream attached.
pub struct FilterSink<F, K> {
    filter: F,
    downstream: K,
}

impl<F: EventFilter, K: EventSink> FilterSink<F, K> {
    pub fn new(filter: F, downstream: K) -> FilterSink<F, K> {
        FilterSink { filter, downstream }
    }

    pub fn filter(&self) -> &F {
        &self.filter
    }

    pub fn into_parts(self) -> (F, K) {
        (self.filter, self.downstream)
    }
}

impl<F: EventFilter, K: EventSink> EventSink for FilterSink<F, K> {
    fn event(&mut self, event: Event) {
        self.filter.process(event, &mut self.downstream)
    }
}

/// A source seen through a filter.
pub struct Filtered<S, F> {
    upstream: S,
    filter: F,
    pending: VecDeque<Event>,
    finished: bool,
}

impl<S: EventSource, F: EventFilter> Filtered<S, F> {
    pub fn new(upstream: S, filter: F) -> Filtered<S, F> {
        Filtered {
            upstream,
            filter,
            pending: VecDeque::new(),
            finished: false,
        }
    }

    pub fn filter(&self) -> &F {
        &self.filter
    }
}

impl<S: EventSource, F: EventFilter> EventSource for Filtered<S, F> {
    fn next_event(&mut self) -> Option<Result<Event, Diagnostic>> {
        loop {
            if let Some(evt) = self.pending.pop_front() {
                return Some(Ok(evt));
            }
            if self.finished {
                return None;
            }
            match self.upstream.next_event() {
                Some(Ok(evt)) => self.filter.process(evt, &mut self.pending),
                Some(Err(err)) => {
                    self.finished = true;
                    return Some(Err(err));
                }
                None => self.finished = true,
            }
        }
    }
}
