fn main() {
    hwtest_orchestrator::run()
}
