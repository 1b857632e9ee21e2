mod matching;
mod support;
