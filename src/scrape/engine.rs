//! Regex-driven extraction of records from program output.

use regex::Regex;
use tracing::debug;

use crate::error::{ParseError, ScrapeError};
use crate::params::{ParamSet, ParamValue};

use super::downsample::downsample;
use super::record::{Record, TIME_KEY};
use super::rules::{
    CorrelatedRule, FieldKind, FieldSpec, ScrapeFamily, StatusRule, ELEMENT_PATTERN, TIME_PATTERN,
};

/// Compiled form of one [`ScrapeFamily`].
#[derive(Debug, Clone)]
pub struct ScrapeEngine {
    family: ScrapeFamily,
    matcher: Matcher,
}

#[derive(Debug, Clone)]
enum Matcher {
    Status {
        rule: StatusRule,
        time: Regex,
        element: Regex,
    },
    Correlated {
        rule: CorrelatedRule,
        left: Regex,
        right: Regex,
    },
}

/// Timestamp, raw value and 1-based line number of one correlated entry.
struct Sample {
    line: usize,
    time_ms: i64,
    raw: String,
}

impl ScrapeEngine {
    /// Compiles the patterns of `family`.
    pub fn new(family: ScrapeFamily) -> Result<Self, ScrapeError> {
        let matcher = match &family {
            ScrapeFamily::Status { rule, .. } => Matcher::Status {
                rule: rule.clone(),
                time: Regex::new(TIME_PATTERN)?,
                element: Regex::new(ELEMENT_PATTERN)?,
            },
            ScrapeFamily::Correlated { rule, .. } => Matcher::Correlated {
                rule: rule.clone(),
                left: Regex::new(&rule.left.pattern)?,
                right: Regex::new(&rule.right.pattern)?,
            },
        };
        Ok(Self { family, matcher })
    }

    /// Compiles a built-in family by name.
    pub fn for_family(name: &str) -> Result<Self, ScrapeError> {
        Self::new(ScrapeFamily::from_name(name)?)
    }

    pub fn family(&self) -> &ScrapeFamily {
        &self.family
    }

    /// Extracts the records of `text`, each merged onto `experiment`.
    pub fn scrape(&self, text: &str, experiment: &ParamSet) -> Result<Vec<Record>, ScrapeError> {
        let records: Vec<Record> = self
            .extract(text)?
            .iter()
            .map(|fields| Record::new(experiment, fields))
            .collect();
        debug!(
            family = %self.family.name(),
            records = records.len(),
            "Scraped output"
        );
        Ok(records)
    }

    /// Extracts the bare fields of every event, after downsampling.
    pub fn extract(&self, text: &str) -> Result<Vec<ParamSet>, ScrapeError> {
        match &self.matcher {
            Matcher::Status {
                rule,
                time,
                element,
            } => {
                let events = extract_status(text, rule, time, element)?;
                Ok(match &rule.downsample {
                    Some(policy) => downsample(&events, policy),
                    None => events,
                })
            }
            Matcher::Correlated { rule, left, right } => {
                extract_correlated(text, rule, left, right)
            }
        }
    }
}

fn extract_status(
    text: &str,
    rule: &StatusRule,
    time_re: &Regex,
    element_re: &Regex,
) -> Result<Vec<ParamSet>, ParseError> {
    let mut events = Vec::new();
    for (index, line) in text.lines().enumerate() {
        if !line.contains(&rule.marker) {
            continue;
        }
        let line_no = index + 1;
        let time = time_re
            .captures(line)
            .and_then(|c| c.get(1))
            .ok_or_else(|| ParseError::MissingTime {
                line: line_no,
                text: line.to_string(),
            })?;

        let mut fields = ParamSet::new();
        fields.update(TIME_KEY, convert(line_no, TIME_KEY, time.as_str(), FieldKind::Int)?);

        let mut elements = element_re.captures_iter(line);
        for (position, spec) in rule.fields.iter().enumerate() {
            let raw = elements
                .next()
                .and_then(|c| c.get(2))
                .ok_or_else(|| ParseError::MissingField {
                    line: line_no,
                    field: spec.name.clone(),
                    position,
                    text: line.to_string(),
                })?;
            fields.update(spec.name.clone(), convert_field(line_no, spec, raw.as_str())?);
        }
        events.push(fields);
    }
    Ok(events)
}

fn extract_correlated(
    text: &str,
    rule: &CorrelatedRule,
    left_re: &Regex,
    right_re: &Regex,
) -> Result<Vec<ParamSet>, ScrapeError> {
    let left = series(text, left_re, &rule.left.field)?;
    let right = series(text, right_re, &rule.right.field)?;
    if left.len() != right.len() {
        return Err(ScrapeError::CountMismatch {
            left: rule.left.field.name.clone(),
            right: rule.right.field.name.clone(),
            left_count: left.len(),
            right_count: right.len(),
        });
    }

    let mut events = Vec::with_capacity(left.len());
    for (index, (l, r)) in left.iter().zip(&right).enumerate() {
        let delta_ms = (l.time_ms - r.time_ms).abs();
        if delta_ms >= rule.tolerance_ms {
            return Err(ScrapeError::TimestampSkew {
                index,
                left_ms: l.time_ms,
                right_ms: r.time_ms,
                delta_ms,
                tolerance_ms: rule.tolerance_ms,
            });
        }
        let mut fields = ParamSet::new();
        fields.update(TIME_KEY, l.time_ms);
        fields.update(
            rule.left.field.name.clone(),
            convert_field(l.line, &rule.left.field, &l.raw)?,
        );
        fields.update(
            rule.right.field.name.clone(),
            convert_field(r.line, &rule.right.field, &r.raw)?,
        );
        events.push(fields);
    }
    Ok(events)
}

fn series(text: &str, re: &Regex, field: &FieldSpec) -> Result<Vec<Sample>, ParseError> {
    let mut samples = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let Some(caps) = re.captures(line) else {
            continue;
        };
        let line_no = index + 1;
        let time = caps.get(1).ok_or_else(|| ParseError::MissingTime {
            line: line_no,
            text: line.to_string(),
        })?;
        let raw = caps.get(2).ok_or_else(|| ParseError::MissingField {
            line: line_no,
            field: field.name.clone(),
            position: 0,
            text: line.to_string(),
        })?;
        let time_ms = time.as_str().parse::<i64>().map_err(|_| ParseError::Conversion {
            line: line_no,
            field: TIME_KEY.to_string(),
            raw: time.as_str().to_string(),
            kind: FieldKind::Int.as_str().to_string(),
        })?;
        samples.push(Sample {
            line: line_no,
            time_ms,
            raw: raw.as_str().trim().to_string(),
        });
    }
    Ok(samples)
}

fn convert_field(line: usize, spec: &FieldSpec, raw: &str) -> Result<ParamValue, ParseError> {
    convert(line, &spec.name, raw, spec.kind)
}

fn convert(line: usize, field: &str, raw: &str, kind: FieldKind) -> Result<ParamValue, ParseError> {
    let error = || ParseError::Conversion {
        line,
        field: field.to_string(),
        raw: raw.to_string(),
        kind: kind.as_str().to_string(),
    };
    match kind {
        FieldKind::Int => raw.parse::<i64>().map(ParamValue::Int).map_err(|_| error()),
        FieldKind::Float => raw.parse::<f64>().map(ParamValue::Float).map_err(|_| error()),
        FieldKind::Str => Ok(ParamValue::Str(raw.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scrape::rules::StatusRule;

    fn generic() -> ScrapeEngine {
        ScrapeEngine::new(ScrapeFamily::Status {
            name: "status".to_string(),
            rule: StatusRule {
                marker: "key1=".to_string(),
                fields: vec![
                    FieldSpec::float("key1"),
                    FieldSpec::int("key2"),
                    FieldSpec::string("key3"),
                ],
                downsample: None,
            },
        })
        .expect("engine")
    }

    #[test]
    fn test_status_lines_become_typed_records() {
        let text = "100 key1=1.0,key2=2,key3=foo\nnoise\n100 key1=1.0,key2=2,key3=foo\n100 key1=1.0,key2=2,key3=foo\n";
        let experiment = ParamSet::new().with("dataset", "wsj200");
        let records = generic().scrape(text, &experiment).expect("scrape");

        assert_eq!(records.len(), 3);
        for record in &records {
            assert_eq!(record.time_ms(), Some(100));
            assert_eq!(record.get("key1"), Some(&ParamValue::Float(1.0)));
            assert_eq!(record.get("key2"), Some(&ParamValue::Int(2)));
            assert_eq!(record.get("key3"), Some(&ParamValue::Str("foo".to_string())));
            assert_eq!(record.get("dataset"), Some(&ParamValue::from("wsj200")));
        }
    }

    #[test]
    fn test_missing_element_is_fatal() {
        let err = generic()
            .extract("100 key1=1.0,key2=2\n")
            .expect_err("should fail");
        match err {
            ScrapeError::Parse(ParseError::MissingField {
                line,
                field,
                position,
                ..
            }) => {
                assert_eq!(line, 1);
                assert_eq!(field, "key3");
                assert_eq!(position, 2);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_bad_conversion_is_fatal() {
        let err = generic()
            .extract("100 key1=1.0,key2=two,key3=foo\n")
            .expect_err("should fail");
        assert!(matches!(
            err,
            ScrapeError::Parse(ParseError::Conversion { ref field, .. }) if field == "key2"
        ));
    }

    #[test]
    fn test_missing_time_is_fatal() {
        let err = generic()
            .extract("key1=1.0,key2=2,key3=foo\n")
            .expect_err("should fail");
        assert!(matches!(err, ScrapeError::Parse(ParseError::MissingTime { line: 1, .. })));
    }

    #[test]
    fn test_extracted_fields_win_over_experiment() {
        let experiment = ParamSet::new().with("key2", 99).with("time", 0);
        let records = generic()
            .scrape("7 key1=1.0,key2=2,key3=foo\n", &experiment)
            .expect("scrape");
        assert_eq!(records[0].get("key2"), Some(&ParamValue::Int(2)));
        assert_eq!(records[0].time_ms(), Some(7));
    }

    #[test]
    fn test_bnb_summary_line() {
        let line = "61234 [main] INFO LazyBranchAndBoundSolver - Summary: upBound=-10.5, lowBound=-12.25, relativeDiff=0.16, numLeaves=8, numFathom=3, numPrune=1, numInfeasible=0, avgFathomDepth=2.5, numSeen=12\n";
        let engine = ScrapeEngine::for_family("bnb").expect("engine");
        let events = engine.extract(line).expect("extract");
        // one overlay entry plus the sample itself
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].get("upBound"), Some(&ParamValue::Float(-10.5)));
        assert_eq!(events[0].get("numSeen"), Some(&ParamValue::Int(12)));
        assert_eq!(events[0].get("time"), Some(&ParamValue::Int(61234)));
    }

    #[test]
    fn test_curnode_line() {
        let line = "500 CurrentNode: id=4, depth=2, side=1, upperBound=-3.5, relaxStatus=Optimal, incumbentScore=-4.0, avgNodeTime=12.5\n";
        let engine = ScrapeEngine::for_family("curnode").expect("engine");
        let events = engine.extract(line).expect("extract");
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].get("relaxStatus"),
            Some(&ParamValue::Str("Optimal".to_string()))
        );
        assert_eq!(events[0].get("avgNodeTime"), Some(&ParamValue::Float(12.5)));
    }

    #[test]
    fn test_incumbent_pairs() {
        let text = "\
1000 INFO Incumbent logLikelihood: -523.5
1010 INFO Incumbent accuracy: 0.61
2000 INFO Incumbent logLikelihood: -500.25
2500 INFO Incumbent accuracy: 0.64
";
        let engine = ScrapeEngine::for_family("incumbent").expect("engine");
        let events = engine.extract(text).expect("extract");
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].get("time"), Some(&ParamValue::Int(2000)));
        assert_eq!(
            events[1].get("incumbentLogLikelihood"),
            Some(&ParamValue::Float(-500.25))
        );
        assert_eq!(events[1].get("incumbentAccuracy"), Some(&ParamValue::Float(0.64)));
    }

    #[test]
    fn test_incumbent_skew_is_fatal() {
        let text = "\
1000 Incumbent logLikelihood: -523.5
1010 Incumbent accuracy: 0.61
2000 Incumbent logLikelihood: -500.25
7000 Incumbent accuracy: 0.64
";
        let engine = ScrapeEngine::for_family("incumbent").expect("engine");
        match engine.extract(text) {
            Err(ScrapeError::TimestampSkew {
                index, delta_ms, ..
            }) => {
                assert_eq!(index, 1);
                assert_eq!(delta_ms, 5000);
            }
            other => panic!("expected skew, got {:?}", other),
        }
    }

    #[test]
    fn test_incumbent_count_mismatch_is_fatal() {
        let text = "1000 Incumbent logLikelihood: -1.0\n";
        let engine = ScrapeEngine::for_family("incumbent").expect("engine");
        assert!(matches!(
            engine.extract(text),
            Err(ScrapeError::CountMismatch {
                left_count: 1,
                right_count: 0,
                ..
            })
        ));
    }

    #[test]
    fn test_incumbent_timestamp_overflow_is_fatal() {
        let text = "\
99999999999999999999 Incumbent logLikelihood: -1.0
1000 Incumbent accuracy: 0.5
";
        let engine = ScrapeEngine::for_family("incumbent").expect("engine");
        assert!(matches!(
            engine.extract(text),
            Err(ScrapeError::Parse(ParseError::Conversion { ref field, .. })) if field == "time"
        ));
    }
}
