#[cfg(test)]
mod test_pir;

#[cfg(test)]
mod test_session;
