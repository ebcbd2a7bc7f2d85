#![no_main]

use libfuzzer_sys::fuzz_target;
use vmscope::{
    disassembler::{Disassembler, OperandShape, OperandShapeTable},
    stream::{Resource, StreamExtractor},
};

fuzz_target!(|data: &[u8]| {
    let Ok(resource) = Resource::from_mem(data.to_vec()) else {
        return;
    };
    let Ok(extractor) = StreamExtractor::new(resource) else {
        return;
    };

    let table = OperandShapeTable::new(1)
        .with(0x07, OperandShape::Branch)
        .with(0x0B, OperandShape::Switch)
        .with(0x2A, OperandShape::None);
    let disassembler = Disassembler::new(table);
    for entry in extractor.method_entries() {
        if let Ok(raw) = extractor.extract_entry(&entry) {
            let _ = disassembler.get_or_create(entry.key, &raw);
        }
    }
});
