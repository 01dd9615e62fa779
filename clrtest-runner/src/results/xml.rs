// Copyright (c) The clrtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A small element tree built from quick-xml events.
//!
//! Result artifacts are small enough to hold in memory, and the parsers are much simpler when
//! they can look ahead at children. Namespaces are ignored: elements and attributes are matched
//! by local name, which is what TRX files need.

use crate::errors::ResultsXmlError;
use quick_xml::{events::Event, Reader};

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(super) struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<Element>,
    text: String,
}

impl Element {
    /// Parses a document and returns its root element.
    pub(super) fn parse_document(xml: &str) -> Result<Self, ResultsXmlError> {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);

        // The bottom of the stack collects the root.
        let mut stack = vec![Element::default()];
        loop {
            match reader.read_event()? {
                Event::Start(start) => {
                    stack.push(Self::from_start(&start)?);
                }
                Event::Empty(start) => {
                    let element = Self::from_start(&start)?;
                    push_child(&mut stack, element)?;
                }
                Event::End(_) => {
                    if stack.len() < 2 {
                        return Err(ResultsXmlError::UnbalancedEnd);
                    }
                    let element = stack.pop().ok_or(ResultsXmlError::UnbalancedEnd)?;
                    push_child(&mut stack, element)?;
                }
                Event::Text(text) => {
                    if let Some(current) = stack.last_mut() {
                        current.text.push_str(&text.unescape()?);
                    }
                }
                Event::CData(data) => {
                    if let Some(current) = stack.last_mut() {
                        current
                            .text
                            .push_str(&String::from_utf8_lossy(&data.into_inner()));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if stack.len() != 1 {
            return Err(ResultsXmlError::UnexpectedEof);
        }
        stack
            .pop()
            .and_then(|document| document.children.into_iter().next())
            .ok_or(ResultsXmlError::NoRoot)
    }

    fn from_start(start: &quick_xml::events::BytesStart<'_>) -> Result<Self, ResultsXmlError> {
        let name = std::str::from_utf8(start.local_name().as_ref())
            .map_err(quick_xml::Error::from)?
            .to_owned();
        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(quick_xml::Error::from)?;
            let key = std::str::from_utf8(attr.key.local_name().as_ref())
                .map_err(quick_xml::Error::from)?
                .to_owned();
            attributes.push((key, attr.unescape_value()?.into_owned()));
        }
        Ok(Self {
            name,
            attributes,
            children: Vec::new(),
            text: String::new(),
        })
    }

    pub(super) fn name(&self) -> &str {
        &self.name
    }

    pub(super) fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub(super) fn text(&self) -> &str {
        &self.text
    }

    pub(super) fn elements(&self) -> impl Iterator<Item = &Element> + '_ {
        self.children.iter()
    }

    pub(super) fn children_named<'a>(
        &'a self,
        name: &'a str,
    ) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |child| child.name == name)
    }

    /// All descendants with the given name, in document order.
    pub(super) fn descendants_named<'a>(&'a self, name: &'a str) -> Vec<&'a Element> {
        let mut found = Vec::new();
        let mut stack: Vec<&Element> = self.children.iter().rev().collect();
        while let Some(element) = stack.pop() {
            if element.name == name {
                found.push(element);
            }
            stack.extend(element.children.iter().rev());
        }
        found
    }

    pub(super) fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|child| child.name == name)
    }

    /// Follows a path of child names, taking the first match at each step.
    pub(super) fn descendant(&self, path: &[&str]) -> Option<&Element> {
        path.iter()
            .try_fold(self, |element, name| element.child(name))
    }

    /// Returns the trimmed text of the element at `path`, if it's present and not empty.
    pub(super) fn text_at(&self, path: &[&str]) -> Option<String> {
        self.descendant(path)
            .map(|element| element.text().trim())
            .filter(|text| !text.is_empty())
            .map(str::to_owned)
    }

    pub(super) fn expect_root(self, expected: &'static str) -> Result<Self, ResultsXmlError> {
        if self.name == expected {
            Ok(self)
        } else {
            Err(ResultsXmlError::UnexpectedRoot {
                expected,
                found: self.name,
            })
        }
    }
}

fn push_child(stack: &mut [Element], element: Element) -> Result<(), ResultsXmlError> {
    let parent = stack.last_mut().ok_or(ResultsXmlError::UnbalancedEnd)?;
    parent.children.push(element);
    Ok(())
}
