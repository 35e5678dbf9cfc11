#![allow(non_snake_case)]
use RustedRetrieval::Examples::retrieval_examples::retrieval_examples;

fn main() {
    let example = 0;
    if let Err(e) = retrieval_examples(example) {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
