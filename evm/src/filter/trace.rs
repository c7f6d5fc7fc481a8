use crate::model::{block::sighash, Trace, TraceRequest};

use super::{matches_any, ItemFilter};

impl ItemFilter<Trace> for TraceRequest {
    fn matches(&self, trace: &Trace) -> bool {
        let sighash = trace
            .sighash
            .clone()
            .or_else(|| trace.input.as_ref().and_then(sighash));

        matches_any(&self.type_, Some(&trace.type_))
            && matches_any(&self.from, trace.from.as_ref())
            && matches_any(&self.to, trace.to.as_ref())
            && matches_any(&self.sighash, sighash.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{Address, Bytes};

    use crate::{
        filter::ItemFilter,
        model::{Trace, TraceRequest, TraceType},
    };

    #[test]
    fn test_trace_filter_by_type_and_sighash() {
        let mut trace = Trace::new(0, vec![], TraceType::Call);
        trace.to = Some(Address::repeat_byte(9));
        trace.input = Some(Bytes::from_static(&[0xa9, 0x05, 0x9c, 0xbb, 0x01]));

        let request = TraceRequest {
            type_: vec![TraceType::Call],
            sighash: vec![Bytes::from_static(&[0xa9, 0x05, 0x9c, 0xbb])],
            ..Default::default()
        };
        assert!(request.matches(&trace));

        let request = TraceRequest {
            type_: vec![TraceType::Create],
            ..Default::default()
        };
        assert!(!request.matches(&trace));
    }
}
