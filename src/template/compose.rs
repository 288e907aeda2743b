//! The `Compose(name) -> Message` engine (§4.5): turns a named template
//! plus the live STAN/RRN counters into a concrete, spec-bound [`Message`].

use chrono::Local;
use rand::Rng;

use super::{TemplateValue, TransactionSet};
use crate::codec::{FieldValue, Message};
use crate::counters::Counters;
use crate::error::{Error, Result};
use crate::spec::MessageSpec;

/// Compose the named template into a [`Message`], applying static values
/// first, then `"auto"` field generation, then one sampled `"random"` row.
/// Neither placeholder ever reaches the returned message — every field is
/// either a literal or a generated value.
pub fn compose(templates: &TransactionSet, name: &str, spec: &MessageSpec, counters: &Counters) -> Result<Message> {
    let tx = templates.get(name).ok_or_else(|| Error::NotFound { name: name.to_string() })?;

    let mti = match tx.fields.get(&0) {
        Some(TemplateValue::Static(s)) => s.clone(),
        _ => {
            return Err(Error::TemplateLoadError {
                message: format!("template {name:?} must declare a static field 0 (MTI)"),
            })
        }
    };
    let mut msg = Message::new(mti);

    // Pass 1: static fields and static composites.
    for (&number, value) in &tx.fields {
        if number == 0 {
            continue;
        }
        match value {
            TemplateValue::Static(s) => msg.set(number, s.clone()),
            TemplateValue::StaticComposite(sub) => {
                let map = sub.iter().map(|(&k, v)| (k, FieldValue::Str(v.clone()))).collect();
                msg.set(number, FieldValue::Composite(map));
            }
            TemplateValue::Auto | TemplateValue::Random => {}
        }
    }

    // Pass 2: auto fields, overriding any static placeholder for the same number.
    for (&number, value) in &tx.fields {
        if *value == TemplateValue::Auto {
            let desc = spec.field(number);
            msg.set(number, auto_value(number, desc, counters));
        }
    }

    // Pass 3: one sampled dataset row, applied wholesale, overriding pass 1/2.
    if tx.fields.values().any(|v| *v == TemplateValue::Random) && !tx.dataset.is_empty() {
        let index = rand::thread_rng().gen_range(0..tx.dataset.len());
        for (&number, value) in &tx.dataset[index] {
            msg.set(number, value.clone());
        }
    }

    Ok(msg)
}

/// Generate an `"auto"` field's value per the field table (§4.5).
fn auto_value(number: u8, desc: Option<&crate::codec::FieldDescriptor>, counters: &Counters) -> String {
    let now = Local::now();
    match number {
        7 => now.format("%m%d%H%M%S").to_string(),
        11 => counters.stan.next(),
        12 => now.format("%H%M%S").to_string(),
        13 | 15 | 17 => now.format("%m%d").to_string(),
        37 => counters.rrn.next(),
        _ => {
            let description = desc.map(|d| d.description.as_str()).unwrap_or("");
            if description.contains("Date") {
                now.format("%m%d").to_string()
            } else if description.contains("Time") {
                now.format("%H%M%S").to_string()
            } else {
                let width = desc.map(|d| d.length).unwrap_or(10).max(1);
                random_numeric(width)
            }
        }
    }
}

fn random_numeric(width: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..width).map(|_| char::from(b'0' + rng.gen_range(0..10))).collect()
}
