// Stop feed parsing
//
// Each service feed lists its stops as
//   <busStop><sms>36232634</sms><nom>Princes Street</nom><x>325812</x><y>673995</y></busStop>
// followed by the other services found along the route in <mnemo> elements. A trailing
// <markers> section carries map markers only and is never read as stop data.

use quick_xml::events::Event;
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::error::Result;
use crate::markup::{decode_cdata, decode_text, lenient_reader, tag_name};
use crate::models::{FeedSummary, StopRecord};

/// Receives the rows produced while crawling. Implemented by the snapshot store.
pub trait StopSink {
    fn insert_stop(&mut self, stop: StopRecord) -> Result<()>;
    fn insert_service_stop(&mut self, stop_code: &str, service: &str) -> Result<()>;
}

// ============================================================================
// Crawl State (one per rebuild)
// ============================================================================

#[derive(Debug, Default)]
pub struct CrawlState {
    queue: Vec<String>,
    queued: HashSet<String>,
    next: usize,
    seen_stops: HashSet<String>,
    seen_associations: HashSet<(String, String)>,
}

impl CrawlState {
    pub fn seeded(seed: &str) -> Self {
        let mut state = Self::default();
        state.enqueue(seed);
        state
    }

    /// Queue a mnemonic unless it is already pending or crawled.
    pub fn enqueue(&mut self, mnemonic: &str) -> bool {
        if mnemonic.is_empty() || self.queued.contains(mnemonic) {
            return false;
        }
        self.queued.insert(mnemonic.to_string());
        self.queue.push(mnemonic.to_string());
        true
    }

    pub fn next_service(&mut self) -> Option<String> {
        let mnemonic = self.queue.get(self.next)?.clone();
        self.next += 1;
        Some(mnemonic)
    }

    pub fn services(&self) -> &[String] {
        &self.queue
    }

    pub fn stop_count(&self) -> usize {
        self.seen_stops.len()
    }

    pub fn association_count(&self) -> usize {
        self.seen_associations.len()
    }
}

// ============================================================================
// Parser
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FeedField {
    StopCode,
    StopName,
    X,
    Y,
    ServiceMnemonic,
}

impl FeedField {
    fn from_tag(name: &str) -> Option<Self> {
        match name {
            "sms" => Some(FeedField::StopCode),
            "nom" => Some(FeedField::StopName),
            "x" => Some(FeedField::X),
            "y" => Some(FeedField::Y),
            "mnemo" => Some(FeedField::ServiceMnemonic),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct PendingStop {
    code: String,
    name: String,
    x: String,
    y: String,
}

pub struct StopFeedParser<'a> {
    service: &'a str,
    field: Option<FeedField>,
    ignore_rest: bool,
    text: String,
    stop: PendingStop,
    summary: FeedSummary,
}

impl<'a> StopFeedParser<'a> {
    const STOP_TAG: &'static str = "busstop";
    const MARKERS_TAG: &'static str = "markers";

    /// Parser for the feed of `service`; every stop found is associated with it.
    pub fn new(service: &'a str) -> Self {
        StopFeedParser {
            service,
            field: None,
            ignore_rest: false,
            text: String::new(),
            stop: PendingStop::default(),
            summary: FeedSummary::default(),
        }
    }

    pub fn parse(
        mut self,
        feed: &[u8],
        crawl: &mut CrawlState,
        sink: &mut impl StopSink,
    ) -> Result<FeedSummary> {
        let mut reader = lenient_reader(feed);
        let mut buf = Vec::new();

        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Start(e) => self.start_element(&tag_name(e.local_name().as_ref())),
                Event::Empty(e) => {
                    let name = tag_name(e.local_name().as_ref());
                    self.start_element(&name);
                    self.end_element(&name, crawl, sink)?;
                }
                Event::End(e) => self.end_element(&tag_name(e.local_name().as_ref()), crawl, sink)?,
                Event::Text(t) => self.characters(&decode_text(&t)),
                Event::CData(c) => self.characters(&decode_cdata(&c)),
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        Ok(self.summary)
    }

    fn start_element(&mut self, name: &str) {
        if self.ignore_rest {
            return;
        }
        if name == Self::MARKERS_TAG {
            self.ignore_rest = true;
            self.field = None;
            return;
        }
        if let Some(field) = FeedField::from_tag(name) {
            self.field = Some(field);
            self.text.clear();
        }
    }

    fn end_element(
        &mut self,
        name: &str,
        crawl: &mut CrawlState,
        sink: &mut impl StopSink,
    ) -> Result<()> {
        if self.ignore_rest {
            return Ok(());
        }

        if let Some(field) = FeedField::from_tag(name) {
            if self.field != Some(field) {
                return Ok(());
            }
            self.field = None;
            let value = self.text.trim().to_string();
            self.text.clear();

            match field {
                FeedField::StopCode => self.stop.code = value,
                FeedField::StopName => self.stop.name = value,
                FeedField::X => self.stop.x = value,
                FeedField::Y => self.stop.y = value,
                FeedField::ServiceMnemonic => {
                    if crawl.enqueue(&value) {
                        self.summary.services_discovered += 1;
                    }
                }
            }
        } else if name == Self::STOP_TAG {
            let stop = std::mem::take(&mut self.stop);
            self.complete_stop(stop, crawl, sink)?;
        }

        Ok(())
    }

    fn characters(&mut self, text: &str) {
        if !self.ignore_rest && self.field.is_some() {
            self.text.push_str(text);
        }
    }

    fn complete_stop(
        &mut self,
        stop: PendingStop,
        crawl: &mut CrawlState,
        sink: &mut impl StopSink,
    ) -> Result<()> {
        if stop.code.is_empty() {
            debug!(service = self.service, "skipping stop without a stop code");
            self.summary.records_skipped += 1;
            return Ok(());
        }

        let (x, y) = match (stop.x.parse::<i64>(), stop.y.parse::<i64>()) {
            (Ok(x), Ok(y)) => (x, y),
            _ => {
                warn!(
                    service = self.service,
                    stop_code = %stop.code,
                    x = %stop.x,
                    y = %stop.y,
                    "⚠️  Skipping stop with invalid coordinates"
                );
                self.summary.records_skipped += 1;
                return Ok(());
            }
        };

        if crawl.seen_stops.insert(stop.code.clone()) {
            sink.insert_stop(StopRecord {
                stop_code: stop.code.clone(),
                stop_name: stop.name,
                x,
                y,
            })?;
            self.summary.stops_inserted += 1;
        }

        if crawl
            .seen_associations
            .insert((stop.code.clone(), self.service.to_string()))
        {
            sink.insert_service_stop(&stop.code, self.service)?;
            self.summary.associations_inserted += 1;
        }

        Ok(())
    }
}
