#![no_main]

#[macro_use]
extern crate libfuzzer_sys;
extern crate libmigauth;

fuzz_target!(|data: &[u8]| {
    let _ = libmigauth::digest::DigestRecord::parse(data);
});
