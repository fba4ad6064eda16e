// Live departures scraping
//
// The departures page lists the stop in an <a> element ("12345 Princes Street /Inbound")
// and the upcoming buses as lines inside <pre> ("22 Ocean Terminal 14:05"). A <span>
// inside the <pre> marks the bus currently being read as wheelchair accessible.

use quick_xml::events::Event;

use crate::error::{Result, TrackerError};
use crate::markup::{collapse_spaces, decode_cdata, decode_text, lenient_reader, tag_name};
use crate::models::{BusArrival, BusServiceBlock, StopDepartures};

const STOP_INFO_TAG: &str = "a";
const BUS_INFO_TAG: &str = "pre";
const ACCESSIBLE_TAG: &str = "span";
const ROUTE_SEPARATOR: char = '/';

#[derive(Debug, Default)]
struct PendingService {
    service_name: Option<String>,
    route: String,
    buses: Vec<BusArrival>,
}

#[derive(Debug, Default)]
pub struct ArrivalParser {
    stop_code: String,
    stop_name: String,
    in_stop_info: bool,
    in_bus_info: bool,
    saw_stop_info: bool,
    services: Vec<PendingService>,
    current: Option<usize>,
    current_arrival: Option<(usize, usize)>,
}

impl ArrivalParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a complete departures page.
    pub fn parse(html: &str) -> Result<StopDepartures> {
        let mut parser = Self::new();
        parser.feed(html.as_bytes())?;
        parser.finish()
    }

    pub fn feed(&mut self, document: &[u8]) -> Result<()> {
        let mut reader = lenient_reader(document);
        let mut buf = Vec::new();

        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Start(e) => self.start_element(&tag_name(e.local_name().as_ref())),
                Event::Empty(e) => {
                    let name = tag_name(e.local_name().as_ref());
                    self.start_element(&name);
                    self.end_element(&name);
                }
                Event::End(e) => self.end_element(&tag_name(e.local_name().as_ref())),
                Event::Text(t) => self.characters(&decode_text(&t)),
                Event::CData(c) => self.characters(&decode_cdata(&c)),
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        Ok(())
    }

    pub fn finish(self) -> Result<StopDepartures> {
        if !self.saw_stop_info {
            return Err(TrackerError::Parse(
                "Departures page did not contain any stop information".to_string(),
            ));
        }

        let services = self
            .services
            .into_iter()
            .filter_map(|s| {
                Some(BusServiceBlock {
                    service_name: s.service_name?,
                    route: s.route,
                    buses: s.buses,
                })
            })
            .collect();

        Ok(StopDepartures {
            stop_code: self.stop_code,
            stop_name: self.stop_name,
            services,
        })
    }

    fn start_element(&mut self, name: &str) {
        match name {
            STOP_INFO_TAG => self.in_stop_info = true,
            BUS_INFO_TAG => self.in_bus_info = true,
            ACCESSIBLE_TAG if self.in_bus_info => {
                if let Some((service, bus)) = self.current_arrival {
                    self.services[service].buses[bus].accessible = true;
                }
            }
            _ => {}
        }
    }

    fn end_element(&mut self, name: &str) {
        match name {
            STOP_INFO_TAG => self.in_stop_info = false,
            BUS_INFO_TAG => {
                self.in_bus_info = false;
                self.current_arrival = None;
            }
            _ => {}
        }
    }

    fn characters(&mut self, text: &str) {
        if !self.in_stop_info && !self.in_bus_info {
            return;
        }

        for raw_line in text.lines() {
            let line = collapse_spaces(raw_line);
            if line.is_empty() {
                continue;
            }
            if self.in_stop_info {
                self.handle_stop_information(&line);
            } else {
                self.handle_bus_information(&line);
            }
        }
    }

    fn handle_stop_information(&mut self, line: &str) {
        let Some((code, rest)) = line.split_once(' ') else {
            return;
        };
        let Some((name, route)) = rest.split_once(ROUTE_SEPARATOR) else {
            return;
        };
        let route = route.trim();
        if code.is_empty() || route.is_empty() {
            return;
        }

        self.stop_code = code.to_string();
        self.stop_name = name.trim().to_string();
        self.saw_stop_info = true;

        self.services.push(PendingService {
            service_name: None,
            route: route.to_string(),
            buses: Vec::new(),
        });
        self.current = Some(self.services.len() - 1);
        self.current_arrival = None;
    }

    fn handle_bus_information(&mut self, line: &str) {
        // A marker after a discarded line belongs to that line, not the previous bus.
        self.current_arrival = None;

        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < 3 {
            return;
        }
        let Some(current) = self.current else {
            return;
        };

        let service_name = tokens[0];
        let arrival_time = tokens[tokens.len() - 1];
        let destination = tokens[1..tokens.len() - 1].join(" ");

        let target = self.service_for(current, service_name);
        self.services[target].buses.push(BusArrival {
            destination,
            arrival_time: arrival_time.to_string(),
            accessible: false,
        });
        self.current_arrival = Some((target, self.services[target].buses.len() - 1));
    }

    /// Index of the block that owns `service_name`, naming or opening one as needed.
    fn service_for(&mut self, current: usize, service_name: &str) -> usize {
        if self.services[current].service_name.as_deref() == Some(service_name) {
            return current;
        }

        let existing = self
            .services
            .iter()
            .position(|s| s.service_name.as_deref() == Some(service_name));

        if self.services[current].service_name.is_none() {
            match existing {
                // The fresh block duplicates a service already on the page.
                Some(index) if self.services[current].buses.is_empty() => {
                    self.services.remove(current);
                    let index = if index > current { index - 1 } else { index };
                    self.current = Some(index);
                    index
                }
                _ => {
                    self.services[current].service_name = Some(service_name.to_string());
                    current
                }
            }
        } else if let Some(index) = existing {
            index
        } else {
            let route = self.services[current].route.clone();
            self.services.push(PendingService {
                service_name: Some(service_name.to_string()),
                route,
                buses: Vec::new(),
            });
            let index = self.services.len() - 1;
            self.current = Some(index);
            index
        }
    }
}
